pub mod cli;
pub mod config;
pub mod network;
pub mod ops;
pub mod topology;

// Re-export key types for easy testing
pub use config::ConnectionConfig;
pub use network::{Client, ClientError, ConnectionError, ConnectionHandle, ConnectionManager};
pub use ops::{Operation, OperationError, OperationState, VersionOperation};
pub use topology::{ConfigurationProvider, Reconfigurable, StaticConfigurationProvider};
