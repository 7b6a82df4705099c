//! Integration tests for the on-disk repository cache layout and freezing.

use repo_cache::{CacheError, Digest, FreezeOutcome, RepositoryCache};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn prefetched(dir: &Path, content: &[u8]) -> (PathBuf, Digest) {
    let digest = Digest::compute(content);
    let path = dir.join(digest.to_hex());
    fs::write(&path, content).unwrap();
    (path, digest)
}

#[cfg(unix)]
fn mode_of(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).unwrap().permissions().mode() & 0o777
}

/// Root ignores permission bits, in which case a frozen directory is still
/// writable and the freeze property cannot be observed.
#[cfg(unix)]
fn permissions_enforced(scratch: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    let locked = scratch.join("locked");
    fs::create_dir(&locked).unwrap();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o500)).unwrap();
    let enforced = fs::write(locked.join("x"), b"x").is_err();
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    enforced
}

#[test]
fn test_put_makes_digest_resolvable() {
    let dir = tempdir().unwrap();
    let (source, digest) = prefetched(dir.path(), b"rules_cc-0.0.9.tar.gz");
    let cache = RepositoryCache::new(dir.path().join("cache"));

    let stored = cache.put(&source).unwrap();
    assert_eq!(stored, digest);
    assert!(cache.contains(&digest));

    let entry = dir
        .path()
        .join("cache/content_addressable/sha256")
        .join(digest.to_hex())
        .join("file");
    assert_eq!(cache.entry_path(&digest), entry);

    let meta = fs::symlink_metadata(&entry).unwrap();
    assert!(meta.file_type().is_symlink());
    assert!(fs::read_link(&entry).unwrap().is_absolute());
    assert_eq!(fs::read(&entry).unwrap(), b"rules_cc-0.0.9.tar.gz");
}

#[test]
fn test_put_verified_accepts_matching_content() {
    let dir = tempdir().unwrap();
    let (source, digest) = prefetched(dir.path(), b"verified");
    let cache = RepositoryCache::new(dir.path().join("cache"));

    assert_eq!(cache.put_verified(&source).unwrap(), digest);
}

#[test]
fn test_unknown_digest_is_absent() {
    let dir = tempdir().unwrap();
    let cache = RepositoryCache::new(dir.path().join("cache"));
    assert!(!cache.contains(&Digest::compute(b"never inserted")));
}

#[cfg(unix)]
#[test]
fn test_freeze_blocks_new_entries() {
    let dir = tempdir().unwrap();
    let (source, _) = prefetched(dir.path(), b"first");
    let (late, late_digest) = prefetched(dir.path(), b"late arrival");
    let cache = RepositoryCache::new(dir.path().join("cache"));
    let digest = cache.put(&source).unwrap();

    let outcome = cache.freeze();
    match outcome {
        // sha256/ and <hash>/; the symlink itself is not chmod-ed
        FreezeOutcome::Frozen { paths } => assert_eq!(paths, 2),
        FreezeOutcome::Skipped { .. } => {
            cache.thaw().unwrap();
            return;
        }
        FreezeOutcome::Failed { path, reason } => panic!("freeze failed at {path:?}: {reason}"),
    }

    // Checked even where the permission bits are not enforced.
    let entry_dir = cache.entry_path(&digest).parent().unwrap().to_path_buf();
    assert_eq!(mode_of(&entry_dir), 0o500);
    assert_eq!(mode_of(entry_dir.parent().unwrap()), 0o500);

    if permissions_enforced(dir.path()) {
        match cache.put(&late) {
            Err(CacheError::Io(e)) => {
                assert_eq!(e.kind(), std::io::ErrorKind::PermissionDenied)
            }
            other => panic!("expected permission error, got {other:?}"),
        }
        assert!(!cache.contains(&late_digest));
    }

    cache.thaw().unwrap();
    assert_eq!(mode_of(&entry_dir), 0o700);
    cache.put(&late).unwrap();
    assert!(cache.contains(&late_digest));
}

#[cfg(unix)]
#[test]
fn test_freeze_empty_cache_creates_tree() {
    let dir = tempdir().unwrap();
    let cache = RepositoryCache::new(dir.path().join("cache"));

    let outcome = cache.freeze();
    assert!(
        outcome.is_frozen() || matches!(outcome, FreezeOutcome::Skipped { .. }),
        "unexpected {outcome:?}"
    );
    let sha_dir = dir.path().join("cache/content_addressable/sha256");
    assert!(sha_dir.is_dir());
    if outcome.is_frozen() {
        assert_eq!(mode_of(&sha_dir), 0o500);
    }

    cache.thaw().unwrap();
}

#[test]
fn test_thaw_without_cache_is_a_no_op() {
    let dir = tempdir().unwrap();
    let cache = RepositoryCache::new(dir.path().join("cache"));
    cache.thaw().unwrap();
    assert!(!dir.path().join("cache").exists());
}
