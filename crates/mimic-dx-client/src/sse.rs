//! Line-oriented Server-Sent Events framing.

/// One dispatched SSE message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseMessage {
    /// Event name, `"message"` unless the server set one.
    pub event: String,
    /// Data lines joined with `\n`.
    pub data: String,
    pub id: Option<String>,
}

/// Accumulates SSE fields line by line and dispatches a message on each blank line.
#[derive(Debug, Default)]
pub struct SseDecoder {
    event: Option<String>,
    data: Option<String>,
    id: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line without its terminator. Returns a message when the line
    /// completes one.
    pub fn push_line(&mut self, line: &str) -> Option<SseMessage> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.event = Some(value.to_string()),
            "data" => match self.data.as_mut() {
                Some(data) => {
                    data.push('\n');
                    data.push_str(value);
                }
                None => self.data = Some(value.to_string()),
            },
            "id" => self.id = Some(value.to_string()),
            // "retry" only matters to reconnecting clients; sessions never reconnect.
            _ => {}
        }
        None
    }

    /// Flush a trailing message when the channel ends without a final blank line.
    pub fn finish(&mut self) -> Option<SseMessage> {
        self.dispatch()
    }

    fn dispatch(&mut self) -> Option<SseMessage> {
        let event = self.event.take();
        let id = self.id.take();
        let data = self.data.take()?;
        Some(SseMessage {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
            id,
        })
    }
}
