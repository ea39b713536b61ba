use std::path::PathBuf;

/// Kind of a file-list entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileKind {
    /// Regular file; the only kind whose content can be requested.
    Regular,
    /// Directory.
    Directory,
    /// Symbolic link. Targets are not transmitted in this protocol
    /// revision.
    Symlink,
    /// Sockets, fifos, devices and anything else.
    Other,
}

/// Owning user of an entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct User {
    /// Numeric user id.
    pub uid: u32,
    /// Resolved user name, when available and requested.
    pub name: Option<String>,
}

impl User {
    /// The root user, used when ownership is not being preserved.
    #[must_use]
    pub const fn root() -> Self {
        Self {
            uid: 0,
            name: None,
        }
    }
}

/// Immutable record describing one entry of the file list.
#[derive(Clone, Debug)]
pub struct FileInfo {
    /// Absolute path on local storage.
    pub path: PathBuf,
    /// Receiver-relative pathname bytes in the negotiated encoding.
    pub name: Vec<u8>,
    /// Entry kind.
    pub kind: FileKind,
    /// Size in bytes; never negative.
    pub size: i64,
    /// Last-modified time in whole seconds since the epoch, clamped to be
    /// non-negative.
    pub mtime: i64,
    /// Mode bits including the file-type bits.
    pub mode: u32,
    /// Owning user.
    pub user: User,
    /// Whether the entry is a top-level item of the transfer (a
    /// user-supplied root).
    pub top_level: bool,
}

impl FileInfo {
    /// Whether this entry is the "dot-dir": a directory standing for the
    /// transfer root itself.
    #[must_use]
    pub fn is_dot_dir(&self) -> bool {
        self.kind == FileKind::Directory && self.name == b"."
    }

    /// Whether the entry's content can be requested for transfer.
    #[must_use]
    pub fn is_regular(&self) -> bool {
        self.kind == FileKind::Regular
    }

    /// Whether the entry is a directory.
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.kind == FileKind::Directory
    }
}
