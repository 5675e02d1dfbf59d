//! Release source port
//! Narrow contract over the backend that publishes versioned artifacts

use crate::domain::error::Result;
use crate::domain::value_objects::Version;
use async_trait::async_trait;
use std::path::Path;

/// Per-chunk progress callback: (downloaded bytes, total bytes).
/// Total is 0 when the backend does not report a content length.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// The current latest release of a repository
    async fn latest_release(&self, repository: &str) -> Result<Version>;

    /// A specific release by tag
    async fn release_by_tag(&self, repository: &str, tag: &str) -> Result<Version>;

    /// Most recent releases, newest first
    async fn list_releases(&self, repository: &str, limit: usize) -> Result<Vec<Version>>;

    /// Stream the release asset to `dest`, creating parent directories and
    /// invoking `progress` per chunk
    async fn download(&self, version: &Version, dest: &Path, progress: ProgressFn<'_>)
        -> Result<()>;
}
