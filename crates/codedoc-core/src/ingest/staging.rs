//! Staging area management.
//!
//! Uploaded archives are persisted content-addressed (SHA-256 of the
//! bytes); each codebase then gets one staging directory named by its
//! id, holding the extracted tree or shallow clone plus the workflow
//! journal. Staging is removed on delete and on terminal failure.

use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};

use crate::config::IngestionConfig;
use crate::error::{CodedocError, CodedocResult};
use crate::types::Language;

/// One file in the materialised source tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Path relative to the source root, forward slashes.
    pub path: String,
    /// File size in bytes.
    pub size: u64,
    /// Language suspected from the file name.
    pub language: Language,
}

/// Archive formats accepted at upload.
const ARCHIVE_SUFFIXES: &[&str] = &[".tar.gz", ".tgz", ".tar"];

/// Reject uploads whose name is not a recognised archive format.
pub fn validate_archive_name(name: &str) -> CodedocResult<()> {
    let lower = name.to_lowercase();
    if ARCHIVE_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        Ok(())
    } else {
        Err(CodedocError::UnrecognisedArchive { name: name.to_string() })
    }
}

/// Reject origin URLs that are not http(s) or git.
pub fn validate_origin_url(url: &str) -> CodedocResult<()> {
    let ok = url.starts_with("https://")
        || url.starts_with("http://")
        || url.starts_with("git://")
        || url.starts_with("ssh://");
    if ok && url.len() > 10 {
        Ok(())
    } else {
        Err(CodedocError::MalformedOrigin { url: url.to_string() })
    }
}

/// Persist uploaded archive bytes content-addressed under
/// `<staging_root>/uploads/`. Returns the archive path and its hex hash.
pub fn store_upload(staging_root: &Path, bytes: &[u8]) -> CodedocResult<(PathBuf, String)> {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let hash = hex::encode(hasher.finalize());

    let uploads = staging_root.join("uploads");
    std::fs::create_dir_all(&uploads)?;
    let path = uploads.join(&hash);
    if !path.exists() {
        std::fs::write(&path, bytes)?;
    }
    Ok((path, hash))
}

/// The staging directory for one codebase.
pub fn codebase_dir(staging_root: &Path, codebase_id: uuid::Uuid) -> PathBuf {
    staging_root.join(codebase_id.to_string())
}

/// The extracted/cloned source tree inside a codebase's staging dir.
pub fn source_dir(staging_root: &Path, codebase_id: uuid::Uuid) -> PathBuf {
    codebase_dir(staging_root, codebase_id).join("source")
}

/// Extract a tar or tar.gz archive into `dest`.
///
/// The tar unpacker refuses entries that escape the destination, so a
/// hostile archive cannot write outside its staging directory.
pub fn extract_archive(archive_path: &Path, dest: &Path) -> CodedocResult<()> {
    std::fs::create_dir_all(dest)?;
    let file = std::fs::File::open(archive_path)?;

    // Sniff the gzip magic rather than trusting the file name.
    let mut magic = [0u8; 2];
    {
        use std::io::Read;
        let mut probe = std::fs::File::open(archive_path)?;
        let _ = probe.read(&mut magic)?;
    }

    if magic == [0x1f, 0x8b] {
        let decoder = flate2::read::GzDecoder::new(file);
        tar::Archive::new(decoder).unpack(dest)?;
    } else {
        tar::Archive::new(file).unpack(dest)?;
    }
    Ok(())
}

/// Shallow-clone a remote repository into `dest` (depth 1, single
/// branch). Blocking; callers run it on a worker thread.
pub fn clone_remote(url: &str, dest: &Path) -> CodedocResult<()> {
    use std::sync::atomic::AtomicBool;

    std::fs::create_dir_all(dest)?;
    let interrupt = AtomicBool::new(false);

    let depth = std::num::NonZeroU32::MIN;
    let mut prepare = gix::prepare_clone(url, dest)
        .map_err(|e| CodedocError::MalformedOrigin { url: format!("{url}: {e}") })?
        .with_shallow(gix::remote::fetch::Shallow::DepthAtRemote(depth));

    let (mut checkout, _outcome) = prepare
        .fetch_then_checkout(gix::progress::Discard, &interrupt)
        .map_err(|e| CodedocError::ProviderUnavailable {
            provider: "git".into(),
            message: format!("clone of {url} failed: {e}"),
        })?;

    let (_repo, _outcome) = checkout
        .main_worktree(gix::progress::Discard, &interrupt)
        .map_err(|e| CodedocError::ProviderUnavailable {
            provider: "git".into(),
            message: format!("checkout of {url} failed: {e}"),
        })?;

    Ok(())
}

/// Walk the source tree and build the file manifest.
///
/// Excluded patterns, oversized files, and unreadable entries are
/// skipped. Entries come back sorted by path so manifests are
/// deterministic across runs.
pub fn build_manifest(
    root: &Path,
    config: &IngestionConfig,
) -> CodedocResult<Vec<ManifestEntry>> {
    let excludes = build_globset(&config.exclude_patterns)?;
    let mut entries = Vec::new();
    walk(root, root, &excludes, config.max_file_bytes, &mut entries)?;
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(entries)
}

fn build_globset(patterns: &[String]) -> CodedocResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| CodedocError::Config {
            details: format!("invalid exclude pattern {pattern}: {e}"),
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|e| CodedocError::Config {
        details: format!("exclude patterns: {e}"),
    })
}

fn walk(
    root: &Path,
    dir: &Path,
    excludes: &GlobSet,
    max_file_bytes: u64,
    entries: &mut Vec<ManifestEntry>,
) -> CodedocResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        // Plain-name patterns (".git", "node_modules") match any component.
        if excludes.is_match(name) {
            continue;
        }

        let metadata = entry.metadata()?;
        if metadata.is_dir() {
            walk(root, &path, excludes, max_file_bytes, entries)?;
            continue;
        }
        if !metadata.is_file() {
            continue;
        }

        let relative = path
            .strip_prefix(root)
            .map_err(|e| CodedocError::Internal(format!("path outside root: {e}")))?;
        let relative_text = relative.to_string_lossy().replace('\\', "/");
        if excludes.is_match(relative_text.as_str()) {
            continue;
        }
        if metadata.len() > max_file_bytes {
            tracing::warn!(path = %relative_text, size = metadata.len(), "file too large, skipping");
            continue;
        }

        entries.push(ManifestEntry {
            language: Language::detect(&path),
            path: relative_text,
            size: metadata.len(),
        });
    }
    Ok(())
}

/// NUL byte in the head of a file marks it binary.
pub fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8192).any(|&b| b == 0)
}

/// Remove a codebase's staging directory, if present.
pub fn remove_staging(staging_root: &Path, codebase_id: uuid::Uuid) {
    let dir = codebase_dir(staging_root, codebase_id);
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(&dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to remove staging");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_archive_name() {
        assert!(validate_archive_name("repo.tar.gz").is_ok());
        assert!(validate_archive_name("repo.TGZ").is_ok());
        assert!(validate_archive_name("repo.tar").is_ok());
        assert!(validate_archive_name("repo.zip").is_err());
        assert!(validate_archive_name("repo").is_err());
    }

    #[test]
    fn test_validate_origin_url() {
        assert!(validate_origin_url("https://github.com/acme/repo.git").is_ok());
        assert!(validate_origin_url("git://host/repo").is_ok());
        assert!(validate_origin_url("ftp://host/repo").is_err());
        assert!(validate_origin_url("not a url").is_err());
    }

    #[test]
    fn test_store_upload_is_content_addressed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (path1, hash1) = store_upload(dir.path(), b"same bytes").expect("store");
        let (path2, hash2) = store_upload(dir.path(), b"same bytes").expect("store");
        assert_eq!(path1, path2);
        assert_eq!(hash1, hash2);

        let (_, hash3) = store_upload(dir.path(), b"other bytes").expect("store");
        assert_ne!(hash1, hash3);
    }

    #[test]
    fn test_extract_tar_gz_roundtrip() {
        let dir = tempfile::tempdir().expect("tempdir");

        // Build a small tar.gz in memory.
        let mut builder = tar::Builder::new(flate2::write::GzEncoder::new(
            Vec::new(),
            flate2::Compression::default(),
        ));
        let content = b"def foo():\n    return 1\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "a.py", content.as_slice())
            .expect("append");
        let gz = builder.into_inner().expect("finish tar");
        let bytes = gz.finish().expect("finish gz");

        let archive_path = dir.path().join("repo.tar.gz");
        std::fs::write(&archive_path, &bytes).expect("write");

        let dest = dir.path().join("out");
        extract_archive(&archive_path, &dest).expect("extract");
        let extracted = std::fs::read_to_string(dest.join("a.py")).expect("read");
        assert_eq!(extracted, "def foo():\n    return 1\n");
    }

    #[test]
    fn test_build_manifest_skips_excluded_and_detects_language() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("main.py"), "x = 1\n").expect("write");
        std::fs::write(dir.path().join("README.md"), "# hi\n").expect("write");
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).expect("mkdir");
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "x").expect("write");
        std::fs::create_dir_all(dir.path().join(".git")).expect("mkdir");
        std::fs::write(dir.path().join(".git/HEAD"), "ref").expect("write");

        let manifest =
            build_manifest(dir.path(), &IngestionConfig::default()).expect("manifest");
        let paths: Vec<&str> = manifest.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["README.md", "main.py"]);

        let py = manifest.iter().find(|e| e.path == "main.py").expect("py");
        assert_eq!(py.language, Language::Python);
    }

    #[test]
    fn test_looks_binary() {
        assert!(looks_binary(b"ELF\x00\x01\x02"));
        assert!(!looks_binary(b"plain text content\n"));
    }
}
