#![deny(unsafe_code)]

//! Sender-side transfer engine for the rsync wire protocol.
//!
//! The [`Sender`] owns the authoritative file set and serves a remote
//! receiver over one duplex byte stream: it streams the file list in
//! bounded segments, answers per-file content requests through the
//! block-matching delta engine, and tears the session down with the
//! DONE/statistics handshake. Everything runs cooperatively on the calling
//! thread; the only suspension points are channel and file I/O.
//!
//! Session negotiation (protocol version, capabilities, the checksum
//! seed), authentication and the transport itself belong to the host;
//! the sender is handed an established stream plus a [`SenderConfig`].

mod config;
pub mod delta;
mod error;
pub mod fileview;
mod messages;
mod sender;
mod stats;

pub use config::{FileSelection, SenderConfig};
pub use error::SenderError;
pub use messages::PeerMessages;
pub use sender::{Sender, SenderSummary};
pub use stats::Statistics;
