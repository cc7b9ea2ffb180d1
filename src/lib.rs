pub mod config;
pub mod errors;
pub mod models;
pub mod services;
pub mod webdav_xml_parser;

pub use errors::{AppError, DavError, ErrorClass};
pub use models::{DirectoryListing, FileInfo, RecoveryOutcome};
pub use services::webdav::{
    AtomicRemoteWriter, InMemoryConnection, RemoteConnection, ReplaceStrategy, WebDAVConnection,
    WriteTask,
};
