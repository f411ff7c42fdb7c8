//! Type definitions for the mimic-dx diagnostic session protocol
//!
//! This crate is the shared contract between the diagnostic client and the remote
//! diagnostic service: the conversation messages replayed on every turn, the typed
//! events pushed by the `/diagnose` stream, and the request/response bodies of the
//! plain JSON endpoints.
//!
//! ## Example
//!
//! ```rust
//! use mimic_dx_types::{DiagnoseEvent, Message, Role};
//!
//! let event = DiagnoseEvent::from_sse_data(r#"{"type":"status","content":"Querying DB"}"#)
//!     .unwrap();
//! assert_eq!(event, DiagnoseEvent::Status("Querying DB".to_string()));
//!
//! let message = Message::user("does patient X have sepsis");
//! assert_eq!(message.role, Role::User);
//! ```

pub mod error;
pub mod events;
pub mod types;

pub use error::*;
pub use events::*;
pub use types::*;
