//! Repository cache population and freezing
//!
//! The build tool keeps downloaded archives in a content-addressable
//! directory keyed by checksum. Rebuilding that directory before an
//! invocation lets a network-isolated build resolve its external
//! dependencies from pre-fetched files.
//!
//! Layout: `<root>/content_addressable/sha256/<hash>/file`, where `file` is a
//! symlink to the absolute path of the pre-fetched artifact. Only sha256
//! keys are supported, and repository rules in the scratch workspace must
//! declare sha256 checksums to hit the cache.

use crate::digest::Digest;
use crate::error::CacheError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Cache subdirectory holding content-addressed entries
pub const CAS_DIR: &str = "content_addressable";

/// The only key type accepted by this cache
pub const KEY_TYPE: &str = "sha256";

/// Name the build tool expects for the cached file inside an entry directory
pub const CACHE_FILENAME: &str = "file";

/// Result of a best-effort [`RepositoryCache::freeze`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FreezeOutcome {
    /// Write permission removed from `paths` files and directories
    Frozen { paths: usize },
    /// The filesystem or platform refused permission changes
    Skipped { reason: String },
    /// An unexpected IO error stopped the walk
    Failed { path: PathBuf, reason: String },
}

impl FreezeOutcome {
    /// Whether every path in the cache is now read-only
    pub fn is_frozen(&self) -> bool {
        matches!(self, FreezeOutcome::Frozen { .. })
    }
}

/// A repository cache rooted at one directory
#[derive(Debug, Clone)]
pub struct RepositoryCache {
    root: PathBuf,
}

impl RepositoryCache {
    /// Create a cache handle. Nothing is written until the first `put`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        RepositoryCache { root: root.into() }
    }

    /// Cache root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entries_dir(&self) -> PathBuf {
        self.root.join(CAS_DIR).join(KEY_TYPE)
    }

    /// Path the build tool will look up for `digest`
    pub fn entry_path(&self, digest: &Digest) -> PathBuf {
        self.entries_dir()
            .join(digest.to_hex())
            .join(CACHE_FILENAME)
    }

    /// Add a pre-fetched artifact whose file name is its sha256 digest.
    ///
    /// Re-putting the same digest replaces the existing pointer.
    pub fn put(&self, source: &Path) -> Result<Digest> {
        let digest = digest_from_file_name(source)?;
        self.insert(source, digest)
    }

    /// Like [`put`](Self::put), but hashes the content and rejects files whose
    /// name does not match their digest.
    pub fn put_verified(&self, source: &Path) -> Result<Digest> {
        let expected = digest_from_file_name(source)?;
        let actual = Digest::of_file(source).map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => CacheError::SourceNotFound(source.to_path_buf()),
            _ => CacheError::Io(e),
        })?;
        if actual != expected {
            return Err(CacheError::DigestMismatch {
                path: source.to_path_buf(),
                expected: expected.to_hex(),
                actual: actual.to_hex(),
            });
        }
        self.insert(source, expected)
    }

    fn insert(&self, source: &Path, digest: Digest) -> Result<Digest> {
        let target = std::path::absolute(source)?;
        if !target.exists() {
            return Err(CacheError::SourceNotFound(target));
        }

        let link = self.entry_path(&digest);
        if let Some(entry_dir) = link.parent() {
            fs::create_dir_all(entry_dir)?;
        }
        if fs::symlink_metadata(&link).is_ok() {
            debug!("Replacing cache entry {:?}", digest);
            fs::remove_file(&link)?;
        }
        symlink_file(&target, &link)?;

        debug!("Cached {} -> {:?}", digest.to_hex(), target);
        Ok(digest)
    }

    /// Whether an entry exists for `digest`
    pub fn contains(&self, digest: &Digest) -> bool {
        fs::symlink_metadata(self.entry_path(digest)).is_ok()
    }

    /// Options that point a build tool invocation at this cache
    pub fn cache_options(&self) -> Vec<String> {
        vec![format!("--repository_cache={}", self.root.display())]
    }

    /// Make the sha256 tree read-only so no new entry can be materialized.
    ///
    /// Files keep owner read, directories keep owner read and execute. Symlinks
    /// are left alone; their parent directory already blocks replacement.
    /// Filesystems that refuse permission changes yield
    /// [`FreezeOutcome::Skipped`] rather than an error.
    pub fn freeze(&self) -> FreezeOutcome {
        let entries = self.entries_dir();
        if let Err(e) = fs::create_dir_all(&entries) {
            return classify(&entries, e);
        }
        let outcome = freeze_tree(&entries);
        match &outcome {
            FreezeOutcome::Frozen { paths } => {
                info!("Froze repository cache {:?} ({} paths)", self.root, paths)
            }
            FreezeOutcome::Skipped { reason } => {
                warn!("Repository cache freeze skipped: {}", reason)
            }
            FreezeOutcome::Failed { path, reason } => {
                warn!("Repository cache freeze failed at {:?}: {}", path, reason)
            }
        }
        outcome
    }

    /// Give the owner write access to the sha256 tree again, undoing
    /// [`freeze`](Self::freeze) so the cache can be removed or refilled.
    ///
    /// A cache that was never created is left alone.
    pub fn thaw(&self) -> Result<()> {
        let entries = self.entries_dir();
        if !entries.exists() {
            return Ok(());
        }
        thaw_tree(&entries)?;
        debug!("Thawed repository cache {:?}", self.root);
        Ok(())
    }
}

fn digest_from_file_name(source: &Path) -> Result<Digest> {
    let name = source
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CacheError::InvalidDigest(source.display().to_string()))?;
    name.parse()
}

#[cfg(unix)]
fn symlink_file(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn symlink_file(target: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(unix)]
fn freeze_tree(top: &Path) -> FreezeOutcome {
    use std::os::unix::fs::PermissionsExt;

    let mut paths = 0;
    // Children first, so a directory loses write access only after its
    // contents have been visited.
    for entry in walkdir::WalkDir::new(top).contents_first(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().unwrap_or(top).to_path_buf();
                let err = e
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::other("filesystem loop"));
                return classify(&path, err);
            }
        };

        let file_type = entry.file_type();
        let mode = if file_type.is_dir() {
            0o500
        } else if file_type.is_file() {
            0o400
        } else {
            continue;
        };

        if let Err(e) = fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode)) {
            return classify(entry.path(), e);
        }
        paths += 1;
    }
    FreezeOutcome::Frozen { paths }
}

#[cfg(unix)]
fn thaw_tree(top: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    for entry in walkdir::WalkDir::new(top) {
        let entry = entry.map_err(io::Error::from)?;
        let file_type = entry.file_type();
        let mode = if file_type.is_dir() {
            0o700
        } else if file_type.is_file() {
            0o600
        } else {
            continue;
        };
        fs::set_permissions(entry.path(), fs::Permissions::from_mode(mode))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn thaw_tree(_top: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(not(unix))]
fn freeze_tree(_top: &Path) -> FreezeOutcome {
    FreezeOutcome::Skipped {
        reason: "POSIX permissions are not supported on this platform".to_string(),
    }
}

fn classify(path: &Path, err: io::Error) -> FreezeOutcome {
    match err.kind() {
        io::ErrorKind::PermissionDenied
        | io::ErrorKind::ReadOnlyFilesystem
        | io::ErrorKind::Unsupported => FreezeOutcome::Skipped {
            reason: format!("{}: {}", path.display(), err),
        },
        _ => FreezeOutcome::Failed {
            path: path.to_path_buf(),
            reason: err.to_string(),
        },
    }
}
