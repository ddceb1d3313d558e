pub mod logging;

// Re-export commonly used items
pub use logging::{init_structured_logging, LogConfig, LogFormat};
