use encoding_rs::{Encoding, UTF_8};

/// How user-supplied roots are traversed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileSelection {
    /// Send exactly the named roots; directory roots are skipped apart
    /// from dot-dir roots, which are expanded one level.
    Exact,
    /// Expand directories incrementally for the whole session.
    Recurse,
}

/// Sender configuration, fixed for the lifetime of a session.
///
/// The profile constructors encode the two call sites: a server sender
/// answers a remote client, a client sender pushes to a remote server.
#[derive(Clone, Debug)]
pub struct SenderConfig {
    /// Traversal mode.
    pub file_selection: FileSelection,
    /// Whether ownership (uid and user name) travels with entries.
    pub preserve_user: bool,
    /// Whether to read (and reject) a filter-rule block at startup.
    pub receive_filter_rules: bool,
    /// Whether to append the statistics block to the teardown sequence.
    pub send_statistics: bool,
    /// Whether an empty initial list ends the session immediately.
    pub exit_early_if_empty_list: bool,
    /// Whether to drain the inbound stream to EOF before returning.
    pub exit_after_eof: bool,
    /// Whether directory-expansion failures are encoded as error-end-list
    /// markers instead of plain segment terminators.
    pub safe_file_list: bool,
    /// Whether a cancellation flag is honoured at suspension points.
    pub interruptible: bool,
    /// Negotiated character encoding for pathnames and user names.
    pub charset: &'static Encoding,
    /// Session checksum seed mixed into every block digest.
    pub checksum_seed: [u8; 16],
}

impl SenderConfig {
    /// Profile for the server role.
    #[must_use]
    pub fn server() -> Self {
        Self {
            file_selection: FileSelection::Exact,
            preserve_user: false,
            receive_filter_rules: true,
            send_statistics: true,
            exit_early_if_empty_list: true,
            exit_after_eof: false,
            safe_file_list: true,
            interruptible: false,
            charset: UTF_8,
            checksum_seed: [0; 16],
        }
    }

    /// Profile for the client role.
    #[must_use]
    pub fn client() -> Self {
        Self {
            receive_filter_rules: false,
            send_statistics: false,
            exit_early_if_empty_list: false,
            exit_after_eof: true,
            ..Self::server()
        }
    }
}
