#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

//! # Overview
//!
//! `checksums` provides the two checksum primitives the sender side of the
//! rsync wire protocol is built on:
//!
//! - [`rolling`] implements the Adler-32-style weak checksum used to screen
//!   candidate block positions while sliding a window over a file. Both state
//!   components are truncated to 16 bits after every update, matching the
//!   reference weak sum bit for bit.
//! - [`strong`] exposes the streaming MD5 wrapper used for per-block digests
//!   (mixed with the session's checksum seed) and for the whole-file digest
//!   that terminates every transferred file.
//!
//! # Invariants
//!
//! - Rolling operations reject empty windows and window lengths that do not
//!   fit in `u32`, so callers never observe silent state corruption.
//! - [`strong::Md5`] streams data incrementally and never panics.
//!
//! # Errors
//!
//! [`RollingError`] reports invalid rolling operations and implements
//! [`std::error::Error`] so failures can be forwarded to user-facing
//! diagnostics.

mod rolling;
pub mod strong;

pub use rolling::{RollingChecksum, RollingError};
