#[macro_use]
mod logging;
pub mod io;
pub mod settings;

pub use io::mcpcan::{FilterRule, FilterTable, McpCanBus, SessionState};
pub use io::{CanFrame, ErrorCategory, IoError};
pub use logging::{DiagnosticSink, Level, NullSink, StderrSink};
pub use settings::BusConfig;
