//! Share enumeration: a snapshot listing of the children under a URI.

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareEntry {
    pub uri: String,
    pub name: String,
    pub is_directory: bool,
    pub size: Option<i64>,
}

#[derive(Debug, Error)]
pub enum BrowseError {
    #[error("cannot read {uri}: {source}")]
    Unreachable {
        uri: String,
        #[source]
        source: std::io::Error,
    },
    #[error("unsupported share uri '{0}'")]
    UnsupportedUri(String),
}

#[async_trait]
pub trait ShareBrowser: Send + Sync {
    async fn list(&self, uri: &str) -> Result<Vec<ShareEntry>, BrowseError>;
}

/// Browses `file://` URIs and plain absolute paths
#[derive(Debug, Default, Clone)]
pub struct LocalShareBrowser;

impl LocalShareBrowser {
    pub fn new() -> Self {
        Self
    }
}

/// Filesystem path for a `file://` URI or an absolute path
pub fn uri_to_path(uri: &str) -> Option<PathBuf> {
    if let Some(rest) = uri.strip_prefix("file://") {
        let decoded = urlencoding::decode(rest).ok()?;
        return Some(PathBuf::from(decoded.into_owned()));
    }
    if uri.contains("://") {
        return None;
    }
    let path = PathBuf::from(uri);
    path.is_absolute().then_some(path)
}

/// URI of a named child, in the same form as its parent
pub fn child_uri(parent: &str, name: &str) -> String {
    let base = parent.trim_end_matches('/');
    if parent.starts_with("file://") {
        format!("{}/{}", base, urlencoding::encode(name))
    } else {
        format!("{}/{}", base, name)
    }
}

/// Last path segment of a URI, decoded
pub fn name_from_uri(uri: &str) -> String {
    let last = uri
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(uri);
    urlencoding::decode(last)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| last.to_string())
}

#[async_trait]
impl ShareBrowser for LocalShareBrowser {
    async fn list(&self, uri: &str) -> Result<Vec<ShareEntry>, BrowseError> {
        let path = uri_to_path(uri).ok_or_else(|| BrowseError::UnsupportedUri(uri.to_string()))?;
        let unreachable = |source| BrowseError::Unreachable {
            uri: uri.to_string(),
            source,
        };

        let mut dir = tokio::fs::read_dir(&path).await.map_err(unreachable)?;
        let mut entries = Vec::new();

        while let Some(entry) = dir.next_entry().await.map_err(unreachable)? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }

            // Follows symlinks; dangling links are skipped
            let meta = match tokio::fs::metadata(entry.path()).await {
                Ok(meta) => meta,
                Err(e) => {
                    tracing::debug!("Skipping unreadable entry {:?}: {}", entry.path(), e);
                    continue;
                }
            };

            entries.push(ShareEntry {
                uri: child_uri(uri, &name),
                is_directory: meta.is_dir(),
                size: (!meta.is_dir()).then(|| i64::try_from(meta.len()).ok()).flatten(),
                name,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uri_to_path() {
        assert_eq!(
            uri_to_path("file:///srv/My%20Movies"),
            Some(PathBuf::from("/srv/My Movies"))
        );
        assert_eq!(uri_to_path("/srv/media"), Some(PathBuf::from("/srv/media")));
        assert_eq!(uri_to_path("smb://nas/media"), None);
        assert_eq!(uri_to_path("relative/dir"), None);
    }

    #[test]
    fn test_child_uri_and_name() {
        let child = child_uri("file:///srv/media/", "Heat (1995).mkv");
        assert_eq!(child, "file:///srv/media/Heat%20%281995%29.mkv");
        assert_eq!(name_from_uri(&child), "Heat (1995).mkv");
        assert_eq!(child_uri("/srv/media", "tv"), "/srv/media/tv");
        assert_eq!(name_from_uri("smb://nas/media/"), "media");
    }

    #[tokio::test]
    async fn test_lists_children_skipping_hidden() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir(tmp.path().join("Season 1")).unwrap();
        std::fs::write(tmp.path().join("movie.mkv"), b"12345").unwrap();
        std::fs::write(tmp.path().join(".DS_Store"), b"").unwrap();

        let uri = format!("file://{}", tmp.path().display());
        let entries = LocalShareBrowser::new().list(&uri).await.unwrap();

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "Season 1");
        assert!(entries[0].is_directory);
        assert_eq!(entries[0].size, None);
        assert_eq!(entries[1].name, "movie.mkv");
        assert_eq!(entries[1].size, Some(5));
        assert_eq!(uri_to_path(&entries[0].uri), Some(tmp.path().join("Season 1")));
    }

    #[tokio::test]
    async fn test_missing_share_is_unreachable() {
        let err = LocalShareBrowser::new()
            .list("/definitely/not/here")
            .await
            .unwrap_err();
        assert!(matches!(err, BrowseError::Unreachable { .. }));
    }
}
