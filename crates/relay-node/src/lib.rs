pub mod codec;
pub mod config;
pub mod fleet;
pub mod probe;
pub mod relay;
pub mod supervisor;
