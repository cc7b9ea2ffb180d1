// WebDAV service modules organized by functionality

pub mod config;
pub mod connection;
pub mod memory;
pub mod url_management;
pub mod writer;

// Re-export main types for convenience
pub use config::{WebDAVConfig, RetryConfig, ReplaceStrategy, WriterConfig};
pub use connection::{RemoteConnection, WebDAVConnection};
pub use memory::{InMemoryConnection, Operation, RecordedCall};
pub use url_management::WebDAVUrlManager;
pub use writer::{AtomicRemoteWriter, WriteTask};

// Test modules
#[cfg(test)]
mod tests;
