//! Terminal rendering of session results.

use mimic_dx_core::{SessionFailure, SessionResult};
use mimic_dx_types::{Message, ProgressSnapshot, QueryResponse, Role};
use serde::Serialize;
use std::io::{self, Write};

pub fn json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn session_result(result: &SessionResult) {
    if let Some(failure) = result.failure() {
        self::failure(&failure);
        return;
    }

    for line in &result.status {
        println!("[status] {}", line);
    }
    if !result.database_info.is_empty() {
        println!("\nDatabase Information:\n{}", result.database_info);
    }
    if !result.thinking.is_empty() {
        println!("\nThinking:\n{}", result.thinking);
    }
    if !result.answer.is_empty() {
        println!("\nAnswer:\n{}", result.answer);
    } else if !result.full_response.is_empty() && result.search_query.is_empty() {
        println!("\n{}", result.full_response);
    }
}

pub fn failure(failure: &SessionFailure) {
    eprintln!("Error: {}", failure.error);
    if let Some(details) = &failure.details {
        eprintln!("  Details: {}", details);
    }
}

/// JSON form of a reachability check.
pub fn probe_report(base_url: &str, outcome: &Result<(), SessionFailure>) -> serde_json::Value {
    match outcome {
        Ok(()) => serde_json::json!({ "reachable": true, "base_url": base_url }),
        Err(failure) => {
            let mut report = serde_json::json!({
                "reachable": false,
                "base_url": base_url,
                "error": failure.error,
            });
            if let Some(details) = &failure.details {
                report["details"] = serde_json::Value::String(details.clone());
            }
            report
        }
    }
}

pub fn progress(snapshot: &ProgressSnapshot) {
    let loading = snapshot
        .files
        .iter()
        .filter(|(_, file)| file.percentage < 100.0)
        .count();
    eprint!(
        "\rLoading model: {:5.1}% ({} of {} files pending)",
        snapshot.overall_progress,
        loading,
        snapshot.files.len()
    );
    if snapshot.overall_progress >= 100.0 {
        eprintln!();
    }
    let _ = io::stderr().flush();
}

pub fn history(messages: &[Message]) {
    if messages.is_empty() {
        println!("No conversation history.");
        return;
    }
    for message in messages {
        let speaker = match message.role {
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        println!("{:>9}: {}", speaker, message.content);
    }
}

pub fn query_response(response: &QueryResponse) -> anyhow::Result<()> {
    if let Some(code) = &response.generated_code {
        println!("Generated code:\n{}\n", code);
    }
    match &response.result {
        Some(result) => println!("Result:\n{}", serde_json::to_string_pretty(result)?),
        None => println!("No result returned."),
    }
    Ok(())
}
