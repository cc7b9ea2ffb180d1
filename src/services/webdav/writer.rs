use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::errors::DavError;
use crate::models::{DirectoryListing, RecoveryOutcome};
use super::config::{ReplaceStrategy, WriterConfig};
use super::connection::RemoteConnection;
use super::url_management::WebDAVUrlManager;

/// Publishes files on a remote store so that readers see either the old
/// content or the new content, never a partial upload.
///
/// The writer holds no state besides the shared connection and its settings;
/// clones are cheap and every operation is reentrant.
#[derive(Clone)]
pub struct AtomicRemoteWriter {
    connection: Arc<dyn RemoteConnection>,
    config: WriterConfig,
}

/// Handle to a write started by [`AtomicRemoteWriter::write_data_to_url_atomically`].
///
/// Resolves exactly once with the URL the data was published at. Calling
/// [`cancel`](WriteTask::cancel) or dropping the handle stops the write before
/// it publishes; a staged upload is left behind in the temporary directory.
pub struct WriteTask {
    handle: JoinHandle<Result<Url, DavError>>,
    cancel: CancellationToken,
    destination: Url,
}

impl WriteTask {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn destination(&self) -> &Url {
        &self.destination
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Future for WriteTask {
    type Output = Result<Url, DavError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match Pin::new(&mut this.handle).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(join_error)) if join_error.is_cancelled() => {
                Poll::Ready(Err(DavError::Cancelled {
                    url: this.destination.to_string(),
                }))
            }
            Poll::Ready(Err(join_error)) => Poll::Ready(Err(DavError::Connection {
                details: format!("write task failed: {}", join_error),
            })),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for WriteTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl AtomicRemoteWriter {
    pub fn new(connection: Arc<dyn RemoteConnection>) -> Self {
        Self::with_config(connection, WriterConfig::default())
    }

    pub fn with_config(connection: Arc<dyn RemoteConnection>, config: WriterConfig) -> Self {
        Self { connection, config }
    }

    pub fn connection(&self) -> &Arc<dyn RemoteConnection> {
        &self.connection
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// Lists `directory_url`, creating it and any missing ancestors first if
    /// it does not exist yet.
    ///
    /// The listing is retried exactly once after creation. If the directory is
    /// gone again by then, something else keeps deleting it and the result is
    /// `Conflict` rather than another round.
    pub async fn fetch_file_infos_ensuring_directory_exists(
        &self,
        directory_url: &Url,
    ) -> Result<DirectoryListing, DavError> {
        let directory = WebDAVUrlManager::as_container(directory_url);

        match self.connection.list(&directory).await {
            Ok(listing) => return Ok(listing),
            Err(DavError::NotFound { .. }) => {
                info!("📁 Directory {} does not exist, creating it", directory);
            }
            Err(e) => return Err(e),
        }

        self.create_container_with_ancestors(&directory).await?;

        match self.connection.list(&directory).await {
            Err(DavError::NotFound { .. }) => {
                warn!("❌ Directory {} vanished right after it was created", directory);
                Err(DavError::conflict(
                    directory.as_str(),
                    "directory was deleted concurrently after creation",
                ))
            }
            other => other,
        }
    }

    /// Creates `container_url` and whichever of its ancestors are missing.
    /// A container that already exists, at any level, counts as success.
    pub async fn create_container_with_ancestors(&self, container_url: &Url) -> Result<(), DavError> {
        let target = WebDAVUrlManager::as_container(container_url);
        let mut missing: Vec<Url> = Vec::new();
        let mut current = target.clone();

        // Walk up until a create succeeds or hits an existing container
        loop {
            match self.connection.create_container(&current).await {
                Ok(()) | Err(DavError::AlreadyExists { .. }) => break,
                Err(DavError::NotFound { .. }) => {
                    let parent = WebDAVUrlManager::parent_container(&current).ok_or_else(|| {
                        DavError::conflict(target.as_str(), "no ancestor container exists")
                    })?;
                    debug!("Parent of {} is missing too", current);
                    missing.push(current);
                    current = parent;
                }
                Err(e) => return Err(e),
            }
        }

        // Then back down, nearest-to-root first
        while let Some(next) = missing.pop() {
            match self.connection.create_container(&next).await {
                Ok(()) => debug!("📁 Created {}", next),
                Err(DavError::AlreadyExists { .. }) => {
                    debug!("{} was created concurrently by another client", next);
                }
                Err(DavError::NotFound { .. }) => {
                    return Err(DavError::conflict(
                        next.as_str(),
                        "parent container was deleted while creating the path",
                    ));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Starts publishing `data` at `destination_url` and returns immediately.
    ///
    /// The bytes are uploaded under a fresh name inside
    /// `temporary_directory_url` and then moved into place. With
    /// `overwrite == false` an existing destination makes the write fail with
    /// `Conflict` and leaves the destination untouched. Both URLs must lie
    /// under `account_base_url`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn write_data_to_url_atomically(
        &self,
        data: impl Into<Bytes>,
        destination_url: Url,
        temporary_directory_url: Url,
        account_base_url: Url,
        overwrite: bool,
    ) -> WriteTask {
        let cancel = CancellationToken::new();
        let writer = self.clone();
        let data = data.into();
        let destination = destination_url.clone();
        let task_cancel = cancel.clone();

        let handle = tokio::spawn(async move {
            writer
                .write_atomically(
                    data,
                    &destination_url,
                    &temporary_directory_url,
                    &account_base_url,
                    overwrite,
                    &task_cancel,
                )
                .await
        });

        WriteTask {
            handle,
            cancel,
            destination,
        }
    }

    /// The body of [`write_data_to_url_atomically`](Self::write_data_to_url_atomically),
    /// for callers that already run inside their own task.
    pub async fn write_atomically(
        &self,
        data: Bytes,
        destination: &Url,
        temporary_directory: &Url,
        account_base: &Url,
        overwrite: bool,
        cancel: &CancellationToken,
    ) -> Result<Url, DavError> {
        WebDAVUrlManager::ensure_within(temporary_directory, account_base)?;
        WebDAVUrlManager::ensure_within(destination, account_base)?;
        if destination.path().ends_with('/') {
            return Err(DavError::invalid_url(destination.as_str(), "destination must name a file"));
        }

        let temporary_directory = WebDAVUrlManager::as_container(temporary_directory);

        ensure_not_cancelled(cancel, destination)?;
        self.fetch_file_infos_ensuring_directory_exists(&temporary_directory)
            .await?;

        let staging_url = WebDAVUrlManager::staging_url(
            &temporary_directory,
            destination,
            &self.config.staging_suffix,
        )?;

        debug!("⬆️ Staging {} bytes for {} at {}", data.len(), destination, staging_url);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!("Write to {} cancelled during upload, {} may be orphaned", destination, staging_url);
                return Err(DavError::Cancelled { url: destination.to_string() });
            }
            uploaded = self.connection.put(data, &staging_url) => uploaded?,
        }

        if cancel.is_cancelled() {
            warn!("Write to {} cancelled before publishing, leaving {}", destination, staging_url);
            return Err(DavError::Cancelled { url: destination.to_string() });
        }

        match self.publish(&staging_url, destination, overwrite).await {
            Ok(final_url) => {
                info!("✅ Published {}", final_url);
                Ok(final_url)
            }
            Err(e) => {
                warn!("❌ Publishing {} failed, staged copy kept at {}: {}", destination, staging_url, e);
                Err(e)
            }
        }
    }

    async fn publish(&self, staged: &Url, destination: &Url, overwrite: bool) -> Result<Url, DavError> {
        // A parked copy from an interrupted replace is still the destination's
        // content and has to be settled before anything lands on top of it.
        self.recover_interrupted_replace(destination).await?;

        if !overwrite {
            return self.connection.move_resource(staged, destination, false).await;
        }

        match self.config.replace_strategy {
            ReplaceStrategy::AtomicMove => self.connection.move_resource(staged, destination, true).await,
            ReplaceStrategy::MoveAside => self.replace_via_aside(staged, destination).await,
        }
    }

    /// Replace for servers whose `Overwrite: T` is not atomic: park the old
    /// content, move the new content in, drop the parked copy.
    async fn replace_via_aside(&self, staged: &Url, destination: &Url) -> Result<Url, DavError> {
        let aside = WebDAVUrlManager::aside_url(destination, &self.config.aside_suffix)?;

        let parked = match self.connection.move_resource(destination, &aside, false).await {
            Ok(_) => {
                debug!("Moved previous {} aside to {}", destination, aside);
                true
            }
            Err(DavError::NotFound { .. }) => {
                debug!("No previous content at {}", destination);
                false
            }
            Err(e) => return Err(e),
        };

        let final_url = match self.connection.move_resource(staged, destination, false).await {
            Ok(url) => url,
            Err(e) => {
                if parked {
                    match self.connection.move_resource(&aside, destination, false).await {
                        Ok(_) => warn!("🔧 Restored previous {} after failed replace", destination),
                        Err(rollback) => warn!(
                            "❌ Could not restore {} from {}, recovery will retry: {}",
                            destination, aside, rollback
                        ),
                    }
                }
                return Err(e);
            }
        };

        match self.connection.delete(&aside).await {
            Ok(()) | Err(DavError::NotFound { .. }) => {}
            Err(e) => {
                // The new content is already visible; the leftover aside copy is
                // finished off by the next recovery for this destination.
                warn!("Could not delete {} after replace: {}", aside, e);
            }
        }

        Ok(final_url)
    }

    /// Moves `source_url` to `destination_url`, creating the destination's
    /// parent containers first. Never overwrites an existing destination.
    pub async fn move_url_to_missing_url_creating_container_if_needed(
        &self,
        source_url: &Url,
        destination_url: &Url,
    ) -> Result<Url, DavError> {
        let parent = WebDAVUrlManager::parent_container(destination_url).ok_or_else(|| {
            DavError::invalid_url(destination_url.as_str(), "destination has no parent container")
        })?;

        self.create_container_with_ancestors(&parent).await?;

        let final_url = self
            .connection
            .move_resource(source_url, destination_url, false)
            .await?;

        info!("🔀 Moved {} to {}", source_url, final_url);
        Ok(final_url)
    }

    /// Finishes or rolls back a move-aside replace that was interrupted.
    ///
    /// If the aside copy exists next to a live destination, the new content
    /// made it and the aside copy is deleted. If the destination is missing,
    /// the aside copy is moved back.
    pub async fn recover_interrupted_replace(&self, destination_url: &Url) -> Result<RecoveryOutcome, DavError> {
        let aside = WebDAVUrlManager::aside_url(destination_url, &self.config.aside_suffix)?;

        match self.connection.stat(&aside).await {
            Ok(_) => {}
            Err(DavError::NotFound { .. }) => return Ok(RecoveryOutcome::Clean),
            Err(e) => return Err(e),
        }

        match self.connection.stat(destination_url).await {
            Ok(_) => {
                match self.connection.delete(&aside).await {
                    Ok(()) | Err(DavError::NotFound { .. }) => {}
                    Err(e) => return Err(e),
                }
                info!("🔧 Finished interrupted replace of {}", destination_url);
                Ok(RecoveryOutcome::Finished)
            }
            Err(DavError::NotFound { .. }) => {
                match self.connection.move_resource(&aside, destination_url, false).await {
                    Ok(_) => {
                        info!("🔧 Rolled back interrupted replace of {}", destination_url);
                        Ok(RecoveryOutcome::RolledBack)
                    }
                    Err(DavError::Conflict { .. }) => {
                        // A new destination appeared in the meantime
                        match self.connection.delete(&aside).await {
                            Ok(()) | Err(DavError::NotFound { .. }) => Ok(RecoveryOutcome::Finished),
                            Err(e) => Err(e),
                        }
                    }
                    Err(DavError::NotFound { .. }) => {
                        debug!("Aside copy of {} was recovered by another client", destination_url);
                        Ok(RecoveryOutcome::Clean)
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken, destination: &Url) -> Result<(), DavError> {
    if cancel.is_cancelled() {
        return Err(DavError::Cancelled {
            url: destination.to_string(),
        });
    }
    Ok(())
}
