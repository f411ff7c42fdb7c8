mod mock_diagnostic_server;

pub use mock_diagnostic_server::{MockDiagnosticServer, MockScript};
