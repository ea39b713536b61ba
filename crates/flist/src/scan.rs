//! Filesystem scanning: turning paths into [`FileInfo`] records.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use encoding_rs::Encoding;
use thiserror::Error;

use crate::entry::{FileInfo, FileKind, User};
#[cfg(unix)]
use crate::user::UserDb;

/// Failures while building file-list entries.
#[derive(Debug, Error)]
pub enum ScanError {
    /// The pathname cannot be represented in the negotiated charset.
    #[error("pathname {path:?} cannot be encoded in the negotiated charset")]
    Encoding {
        /// Offending path.
        path: PathBuf,
    },
    /// A stat call failed.
    #[error("failed to stat {path:?}: {source}")]
    Stat {
        /// Offending path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
}

/// Result of listing one directory level.
#[derive(Debug, Default)]
pub struct DirScan {
    /// Immediate children, sorted by wire name.
    pub entries: Vec<FileInfo>,
    /// Whether any child was dropped due to a local I/O failure, or the
    /// directory could not be read at all.
    pub io_error: bool,
    /// Whether every child name survived charset conversion.
    pub names_ok: bool,
}

/// Builds [`FileInfo`] records from the local filesystem.
#[derive(Debug)]
pub struct Scanner {
    charset: &'static Encoding,
    preserve_user: bool,
    #[cfg(unix)]
    users: UserDb,
}

impl Scanner {
    /// Creates a scanner converting names with `charset` and resolving
    /// user names when `preserve_user` is set.
    #[must_use]
    pub fn new(charset: &'static Encoding, preserve_user: bool) -> Self {
        Self {
            charset,
            preserve_user,
            #[cfg(unix)]
            users: UserDb::new(),
        }
    }

    /// Stats a user-supplied root and derives its wire name: the final
    /// path component, or `.` for dot-dir roots (a bare `.` or a path
    /// spelled with a trailing `/.`).
    pub fn stat_root(&mut self, path: &Path) -> Result<FileInfo, ScanError> {
        let name = if ends_with_dot(path) {
            OsString::from(".")
        } else {
            path.file_name()
                .map_or_else(|| OsString::from("."), OsStr::to_os_string)
        };
        let mut info = self.stat(path, &name, None)?;
        info.top_level = true;
        Ok(info)
    }

    /// Stats `path`, deriving the wire name from `file_name` and the
    /// parent's wire name.
    pub fn stat(
        &mut self,
        path: &Path,
        file_name: &OsStr,
        parent_wire_name: Option<&[u8]>,
    ) -> Result<FileInfo, ScanError> {
        let metadata = fs::symlink_metadata(path).map_err(|source| ScanError::Stat {
            path: path.to_path_buf(),
            source,
        })?;

        let encoded = self.encode_name(file_name).ok_or_else(|| ScanError::Encoding {
            path: path.to_path_buf(),
        })?;
        let name = match parent_wire_name {
            // Children of the dot-dir get bare names.
            None => encoded,
            Some(parent) if parent == b"." => encoded,
            Some(parent) => {
                let mut joined = Vec::with_capacity(parent.len() + 1 + encoded.len());
                joined.extend_from_slice(parent);
                joined.push(b'/');
                joined.extend_from_slice(&encoded);
                joined
            }
        };

        let file_type = metadata.file_type();
        let kind = if file_type.is_dir() {
            FileKind::Directory
        } else if file_type.is_file() {
            FileKind::Regular
        } else if file_type.is_symlink() {
            FileKind::Symlink
        } else {
            FileKind::Other
        };

        Ok(FileInfo {
            path: path.to_path_buf(),
            name,
            kind,
            size: metadata.len() as i64,
            mtime: mtime_seconds(&metadata),
            mode: mode_bits(&metadata, kind),
            user: self.user_for(&metadata),
            top_level: false,
        })
    }

    /// Lists the immediate children of `dir`, sorted by wire name.
    ///
    /// Children that fail to stat are dropped and flagged as I/O errors;
    /// children whose names do not survive charset conversion are dropped
    /// and flagged separately.
    pub fn list_directory(&mut self, dir: &FileInfo) -> DirScan {
        let mut scan = DirScan {
            entries: Vec::new(),
            io_error: false,
            names_ok: true,
        };

        let reader = match fs::read_dir(&dir.path) {
            Ok(reader) => reader,
            Err(err) => {
                tracing::warn!(path = %dir.path.display(), error = %err, "failed to read directory");
                scan.io_error = true;
                return scan;
            }
        };

        for dirent in reader {
            let dirent = match dirent {
                Ok(dirent) => dirent,
                Err(err) => {
                    tracing::warn!(path = %dir.path.display(), error = %err, "failed to read directory entry");
                    scan.io_error = true;
                    continue;
                }
            };
            let child_path = dirent.path();
            match self.stat(&child_path, &dirent.file_name(), Some(&dir.name)) {
                Ok(info) => scan.entries.push(info),
                Err(ScanError::Encoding { path }) => {
                    tracing::warn!(path = %path.display(), "dropping entry with unencodable name");
                    scan.names_ok = false;
                }
                Err(ScanError::Stat { path, source }) => {
                    tracing::warn!(path = %path.display(), error = %source, "dropping unstattable entry");
                    scan.io_error = true;
                }
            }
        }

        scan.entries.sort_by(|a, b| a.name.cmp(&b.name));
        scan
    }

    fn encode_name(&mut self, name: &OsStr) -> Option<Vec<u8>> {
        let utf8 = name.to_str()?;
        let (bytes, _, had_errors) = self.charset.encode(utf8);
        if had_errors {
            return None;
        }
        Some(bytes.into_owned())
    }

    #[cfg(unix)]
    fn user_for(&mut self, metadata: &fs::Metadata) -> User {
        use std::os::unix::fs::MetadataExt;

        let uid = metadata.uid();
        let name = if self.preserve_user {
            self.users.name_of(uid)
        } else {
            None
        };
        User { uid, name }
    }

    #[cfg(not(unix))]
    fn user_for(&mut self, _metadata: &fs::Metadata) -> User {
        User::root()
    }
}

/// `Path` components normalise a trailing `/.` away, so the dot-dir
/// spelling has to be recovered from the raw OS string.
fn ends_with_dot(path: &Path) -> bool {
    let bytes = path.as_os_str().as_encoded_bytes();
    bytes == b"." || bytes.ends_with(b"/.")
}

#[cfg(unix)]
fn mtime_seconds(metadata: &fs::Metadata) -> i64 {
    use std::os::unix::fs::MetadataExt;

    metadata.mtime().max(0)
}

#[cfg(not(unix))]
fn mtime_seconds(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map_or(0, |d| d.as_secs() as i64)
}

#[cfg(unix)]
fn mode_bits(metadata: &fs::Metadata, _kind: FileKind) -> u32 {
    use std::os::unix::fs::MetadataExt;

    metadata.mode()
}

#[cfg(not(unix))]
fn mode_bits(_metadata: &fs::Metadata, kind: FileKind) -> u32 {
    match kind {
        FileKind::Directory => 0o40755,
        _ => 0o100644,
    }
}
