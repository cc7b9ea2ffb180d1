mod write_tests;

use std::sync::Arc;
use url::Url;

use super::{AtomicRemoteWriter, InMemoryConnection, ReplaceStrategy, WriterConfig};

/// URL on the in-memory test store
pub(crate) fn url(path: &str) -> Url {
    Url::parse("https://dav.test")
        .and_then(|base| base.join(path))
        .expect("valid test URL")
}

pub(crate) fn writer_with(strategy: ReplaceStrategy) -> (Arc<InMemoryConnection>, AtomicRemoteWriter) {
    let conn = Arc::new(InMemoryConnection::new());
    let config = WriterConfig {
        replace_strategy: strategy,
        ..WriterConfig::default()
    };
    let writer = AtomicRemoteWriter::with_config(conn.clone(), config);
    (conn, writer)
}

pub(crate) fn writer() -> (Arc<InMemoryConnection>, AtomicRemoteWriter) {
    writer_with(ReplaceStrategy::AtomicMove)
}

/// Paths currently stored under the staging directory `/acct/.tmp`
pub(crate) fn staged_paths(conn: &InMemoryConnection) -> Vec<String> {
    conn.paths()
        .into_iter()
        .filter(|p| p.starts_with("/acct/.tmp/"))
        .collect()
}
