use url::Url;
use uuid::Uuid;

use crate::errors::DavError;

/// URL helpers for container paths, staging names and aside names.
///
/// WebDAV servers are picky about trailing slashes on collections (many answer
/// a `PROPFIND` on `/Docs` with a 301 to `/Docs/`), so everything that names a
/// container goes through [`as_container`] first.
pub struct WebDAVUrlManager;

impl WebDAVUrlManager {
    /// Returns `url` with exactly one trailing slash on its path
    pub fn as_container(url: &Url) -> Url {
        let mut container = url.clone();
        if !container.path().ends_with('/') {
            let path = format!("{}/", container.path());
            container.set_path(&path);
        }
        container
    }

    /// Parent container of a file or container URL, `None` at the root
    pub fn parent_container(url: &Url) -> Option<Url> {
        let trimmed = url.path().trim_end_matches('/');
        if trimmed.is_empty() {
            return None;
        }

        let cut = trimmed.rfind('/')?;
        let mut parent = url.clone();
        parent.set_path(&trimmed[..=cut]);
        parent.set_query(None);
        parent.set_fragment(None);
        Some(parent)
    }

    /// Last path segment, percent-decoded
    pub fn file_name(url: &Url) -> Option<String> {
        let segment = url.path().trim_end_matches('/').rsplit('/').next()?;
        if segment.is_empty() {
            return None;
        }
        Some(
            urlencoding::decode(segment)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| segment.to_string()),
        )
    }

    /// Whether `url` lies inside (or is) the container `base`
    pub fn is_within(url: &Url, base: &Url) -> bool {
        let base = Self::as_container(base);
        url.scheme() == base.scheme()
            && url.host_str() == base.host_str()
            && url.port_or_known_default() == base.port_or_known_default()
            && Self::as_container(url).path().starts_with(base.path())
    }

    /// Fails with `InvalidUrl` unless `url` is inside `base`
    pub fn ensure_within(url: &Url, base: &Url) -> Result<(), DavError> {
        if Self::is_within(url, base) {
            Ok(())
        } else {
            Err(DavError::invalid_url(
                url.as_str(),
                format!("outside of account base {}", base),
            ))
        }
    }

    /// Fresh, never reused name inside `temporary_directory` for staging the
    /// content destined for `destination`
    pub fn staging_url(
        temporary_directory: &Url,
        destination: &Url,
        suffix: &str,
    ) -> Result<Url, DavError> {
        let name = Self::file_name(destination).unwrap_or_else(|| "data".to_string());
        let staged_name = format!("{}-{}{}", Uuid::new_v4(), name, suffix);
        Self::child(temporary_directory, &staged_name)
    }

    /// Sibling of `destination` where its previous content is parked during a
    /// move-aside replace
    pub fn aside_url(destination: &Url, suffix: &str) -> Result<Url, DavError> {
        let name = Self::file_name(destination)
            .ok_or_else(|| DavError::invalid_url(destination.as_str(), "destination has no file name"))?;
        let parent = Self::parent_container(destination)
            .ok_or_else(|| DavError::invalid_url(destination.as_str(), "destination has no parent"))?;
        Self::child(&parent, &format!("{}{}", name, suffix))
    }

    /// `name` as a direct child of the container `parent`
    pub fn child(parent: &Url, name: &str) -> Result<Url, DavError> {
        let encoded = urlencoding::encode(name);
        Self::as_container(parent)
            .join(&encoded)
            .map_err(|e| DavError::invalid_url(parent.as_str(), e.to_string()))
    }
}
