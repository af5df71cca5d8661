//! Baseline folder management and baseline file storage.
//!
//! Baselines are pristine copies of committed file content, stored under a
//! hidden folder at a working-folder root. Files are spread across 16
//! numbered partition subfolders keyed by the first byte of the baseline
//! identifier, and stored either gzip-compressed (`.gz`) or raw (`.rw`).
//!
//! # Public API
//! - [`BaselineFolder`]: a usable baseline folder root
//! - [`BaselineId`]: 16-byte baseline identifier with path mapping
//! - [`is_potential_baseline_folder_name`]: enumeration filter

use crate::core::error::{Result, WorkspaceTrackerError};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, warn};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// Base name of the hidden baseline folder.
#[cfg(windows)]
pub const BASELINE_FOLDER_BASE_NAME: &str = "$tf";
#[cfg(not(windows))]
pub const BASELINE_FOLDER_BASE_NAME: &str = ".tf";

/// Number of partition subfolders inside a baseline folder.
pub const PARTITION_COUNT: u8 = 16;

/// Highest numeric suffix tried when the base name is unavailable.
const MAX_FOLDER_SUFFIX: u32 = 15;

/// Extension of gzip-compressed baseline files.
pub const GZIP_EXTENSION: &str = "gz";

/// Extension of uncompressed baseline files.
pub const RAW_EXTENSION: &str = "rw";

/// True if the given file name could be a baseline folder (`.tf`, `.tf1`
/// through `.tf15`, or the Windows `$tf` forms). Enumeration uses this to
/// skip baseline folders without touching the disk.
pub fn is_potential_baseline_folder_name(name: &str) -> bool {
    let candidates: &[&str] = &[".tf", "$tf"];
    for base in candidates {
        let Some(rest) = strip_prefix_fold(name, base) else {
            continue;
        };
        if rest.is_empty() {
            return true;
        }
        if let Ok(n) = rest.parse::<u32>() {
            if (1..=MAX_FOLDER_SUFFIX).contains(&n) && !rest.starts_with('0') {
                return true;
            }
        }
    }
    false
}

fn strip_prefix_fold<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// A 16-byte baseline identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BaselineId(pub [u8; 16]);

impl BaselineId {
    pub fn from_slice(bytes: &[u8]) -> Result<BaselineId> {
        let arr: [u8; 16] = bytes
            .try_into()
            .map_err(|_| WorkspaceTrackerError::InvalidBaselineId {
                length: bytes.len(),
            })?;
        Ok(BaselineId(arr))
    }

    /// The partition subfolder (0-15) this identifier lives in.
    pub fn partition(&self) -> u8 {
        self.0[0] % PARTITION_COUNT
    }
}

impl fmt::Display for BaselineId {
    /// Lowercase 8-4-4-4-12 hex form used as the on-disk file name.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12],
            b[13], b[14], b[15]
        )
    }
}

/// A created-and-usable baseline folder at some working-folder root.
#[derive(Debug, Clone)]
pub struct BaselineFolder {
    /// The working-folder root this baseline folder belongs to.
    pub root: String,
    /// Full path of the baseline folder itself.
    pub path: PathBuf,
}

impl BaselineFolder {
    /// Creates (or reuses) the baseline folder under `root`. Tries the base
    /// name first, then numbered fallbacks.
    pub fn create(root: &str) -> Result<BaselineFolder> {
        for suffix in 0..=MAX_FOLDER_SUFFIX {
            let name = if suffix == 0 {
                BASELINE_FOLDER_BASE_NAME.to_string()
            } else {
                format!("{}{}", BASELINE_FOLDER_BASE_NAME, suffix)
            };
            let path = Path::new(root).join(&name);

            match ensure_folder(&path) {
                Ok(()) => {
                    debug!("baseline folder ready: {}", path.display());
                    return Ok(BaselineFolder {
                        root: root.to_string(),
                        path,
                    });
                }
                Err(e) => {
                    warn!(
                        "baseline folder candidate {} unusable: {}",
                        path.display(),
                        e
                    );
                }
            }
        }

        Err(WorkspaceTrackerError::BaselineFolderUnavailable {
            path: PathBuf::from(root),
        })
    }

    /// Opens an existing baseline folder without creating anything.
    pub fn open(root: &str) -> Option<BaselineFolder> {
        for suffix in 0..=MAX_FOLDER_SUFFIX {
            let name = if suffix == 0 {
                BASELINE_FOLDER_BASE_NAME.to_string()
            } else {
                format!("{}{}", BASELINE_FOLDER_BASE_NAME, suffix)
            };
            let path = Path::new(root).join(&name);
            if path.is_dir() {
                return Some(BaselineFolder {
                    root: root.to_string(),
                    path,
                });
            }
        }
        None
    }

    /// The path a baseline file for `id` would occupy, without extension.
    pub fn baseline_path(&self, id: &BaselineId) -> PathBuf {
        self.path
            .join(id.partition().to_string())
            .join(id.to_string())
    }

    /// Stores file content as a baseline, compressed unless `raw` is set.
    /// Any previous baseline under the same identifier is replaced.
    pub fn store_baseline(&self, id: &BaselineId, source: &Path, raw: bool) -> Result<PathBuf> {
        let base = self.baseline_path(id);
        if let Some(parent) = base.parent() {
            fs::create_dir_all(parent)?;
        }
        self.remove_baseline(id)?;

        let mut input = File::open(source)?;
        let target = if raw {
            let target = base.with_extension(RAW_EXTENSION);
            let mut output = File::create(&target)?;
            io::copy(&mut input, &mut output)?;
            target
        } else {
            let target = base.with_extension(GZIP_EXTENSION);
            let output = File::create(&target)?;
            let mut encoder = GzEncoder::new(output, Compression::default());
            io::copy(&mut input, &mut encoder)?;
            encoder.finish()?;
            target
        };

        debug!("stored baseline {} at {}", id, target.display());
        Ok(target)
    }

    /// Copies baseline content to `destination`, decompressing as needed.
    pub fn restore_baseline(&self, id: &BaselineId, destination: &Path) -> Result<()> {
        let base = self.baseline_path(id);

        let gz = base.with_extension(GZIP_EXTENSION);
        if gz.is_file() {
            let mut decoder = GzDecoder::new(File::open(&gz)?);
            let mut output = File::create(destination)?;
            io::copy(&mut decoder, &mut output)?;
            return Ok(());
        }

        let rw = base.with_extension(RAW_EXTENSION);
        if rw.is_file() {
            let mut input = File::open(&rw)?;
            let mut output = File::create(destination)?;
            io::copy(&mut input, &mut output)?;
            return Ok(());
        }

        Err(WorkspaceTrackerError::BaselineNotFound {
            id: id.to_string(),
            folder: self.path.clone(),
        })
    }

    /// Reads baseline content into memory, decompressing as needed.
    pub fn read_baseline(&self, id: &BaselineId) -> Result<Vec<u8>> {
        let base = self.baseline_path(id);
        let mut buffer = Vec::new();

        let gz = base.with_extension(GZIP_EXTENSION);
        if gz.is_file() {
            GzDecoder::new(File::open(&gz)?).read_to_end(&mut buffer)?;
            return Ok(buffer);
        }

        let rw = base.with_extension(RAW_EXTENSION);
        if rw.is_file() {
            File::open(&rw)?.read_to_end(&mut buffer)?;
            return Ok(buffer);
        }

        Err(WorkspaceTrackerError::BaselineNotFound {
            id: id.to_string(),
            folder: self.path.clone(),
        })
    }

    /// True if a baseline file exists for `id` in either encoding.
    pub fn has_baseline(&self, id: &BaselineId) -> bool {
        let base = self.baseline_path(id);
        base.with_extension(GZIP_EXTENSION).is_file()
            || base.with_extension(RAW_EXTENSION).is_file()
    }

    /// Deletes the baseline for `id` in whichever encodings exist.
    pub fn remove_baseline(&self, id: &BaselineId) -> Result<()> {
        let base = self.baseline_path(id);
        for ext in [GZIP_EXTENSION, RAW_EXTENSION] {
            let candidate = base.with_extension(ext);
            match fs::remove_file(&candidate) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// Creates the folder if needed and verifies it is writable.
fn ensure_folder(path: &Path) -> io::Result<()> {
    if path.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            "a file occupies the folder name",
        ));
    }
    fs::create_dir_all(path)?;

    // Probe writability so an unusable candidate fails over to the next
    // suffix instead of failing later mid-store.
    let probe = path.join(".probe");
    File::create(&probe)?;
    fs::remove_file(&probe)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn id_with_first_byte(b: u8) -> BaselineId {
        let mut bytes = [0u8; 16];
        bytes[0] = b;
        bytes[15] = 0xfe;
        BaselineId(bytes)
    }

    #[test]
    fn test_potential_folder_names() {
        assert!(is_potential_baseline_folder_name(".tf"));
        assert!(is_potential_baseline_folder_name("$tf"));
        assert!(is_potential_baseline_folder_name(".tf1"));
        assert!(is_potential_baseline_folder_name(".tf15"));
        assert!(!is_potential_baseline_folder_name(".tf16"));
        assert!(!is_potential_baseline_folder_name(".tf01"));
        assert!(!is_potential_baseline_folder_name(".tfx"));
        assert!(!is_potential_baseline_folder_name("tf"));
    }

    #[test]
    fn test_partition_is_first_byte_mod_16() {
        assert_eq!(id_with_first_byte(0x00).partition(), 0);
        assert_eq!(id_with_first_byte(0x13).partition(), 3);
        assert_eq!(id_with_first_byte(0xff).partition(), 15);
    }

    #[test]
    fn test_id_display_format() {
        let id = BaselineId([
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
            0xcd, 0xef,
        ]);
        assert_eq!(id.to_string(), "01234567-89ab-cdef-0123-456789abcdef");
    }

    #[test]
    fn test_id_from_slice_rejects_wrong_length() {
        assert!(BaselineId::from_slice(&[0u8; 15]).is_err());
        assert!(BaselineId::from_slice(&[0u8; 16]).is_ok());
    }

    #[test]
    fn test_create_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_str().unwrap();
        let a = BaselineFolder::create(root).unwrap();
        let b = BaselineFolder::create(root).unwrap();
        assert_eq!(a.path, b.path);
    }

    #[test]
    fn test_create_falls_back_when_base_name_taken() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_str().unwrap();
        std::fs::write(tmp.path().join(BASELINE_FOLDER_BASE_NAME), b"file").unwrap();

        let folder = BaselineFolder::create(root).unwrap();
        let name = folder.path.file_name().unwrap().to_str().unwrap();
        assert_eq!(name, format!("{}1", BASELINE_FOLDER_BASE_NAME));
    }

    #[test]
    fn test_store_and_restore_compressed() {
        let tmp = TempDir::new().unwrap();
        let folder = BaselineFolder::create(tmp.path().to_str().unwrap()).unwrap();
        let id = id_with_first_byte(0x13);

        let source = tmp.path().join("source.txt");
        std::fs::write(&source, b"pristine content").unwrap();

        let stored = folder.store_baseline(&id, &source, false).unwrap();
        assert_eq!(stored.extension().unwrap(), GZIP_EXTENSION);
        assert!(stored.parent().unwrap().ends_with("3"));

        let restored = tmp.path().join("restored.txt");
        folder.restore_baseline(&id, &restored).unwrap();
        assert_eq!(std::fs::read(&restored).unwrap(), b"pristine content");
    }

    #[test]
    fn test_store_and_restore_raw() {
        let tmp = TempDir::new().unwrap();
        let folder = BaselineFolder::create(tmp.path().to_str().unwrap()).unwrap();
        let id = id_with_first_byte(0x02);

        let source = tmp.path().join("source.bin");
        std::fs::write(&source, vec![0u8, 1, 2, 3]).unwrap();

        let stored = folder.store_baseline(&id, &source, true).unwrap();
        assert_eq!(stored.extension().unwrap(), RAW_EXTENSION);
        assert_eq!(folder.read_baseline(&id).unwrap(), vec![0u8, 1, 2, 3]);
    }

    #[test]
    fn test_store_replaces_other_encoding() {
        let tmp = TempDir::new().unwrap();
        let folder = BaselineFolder::create(tmp.path().to_str().unwrap()).unwrap();
        let id = id_with_first_byte(0x07);

        let source = tmp.path().join("s");
        std::fs::write(&source, b"v1").unwrap();
        folder.store_baseline(&id, &source, true).unwrap();

        std::fs::write(&source, b"v2").unwrap();
        folder.store_baseline(&id, &source, false).unwrap();

        // Only the new encoding remains.
        let base = folder.baseline_path(&id);
        assert!(!base.with_extension(RAW_EXTENSION).exists());
        assert_eq!(folder.read_baseline(&id).unwrap(), b"v2");
    }

    #[test]
    fn test_missing_baseline_is_error() {
        let tmp = TempDir::new().unwrap();
        let folder = BaselineFolder::create(tmp.path().to_str().unwrap()).unwrap();
        let err = folder
            .read_baseline(&id_with_first_byte(0x01))
            .unwrap_err();
        assert!(matches!(err, WorkspaceTrackerError::BaselineNotFound { .. }));
    }
}
