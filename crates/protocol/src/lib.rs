#![deny(unsafe_code)]

//! Byte-level wire formats for the sending side of the rsync protocol.
//!
//! The crate is organised leaves-first:
//!
//! - [`varint`] is the variable-length little-endian integer codec every
//!   length field on the wire uses.
//! - [`envelope`] defines the multiplexed frame header
//!   (`(MPLEX_BASE + code) << 24 | payload_len`, little-endian) and the
//!   out-of-band message codes.
//! - [`index`] is the run-length-delta codec for file indices, including the
//!   `DONE`/`EOF` sentinels and stub-directory references.
//! - [`multiplex`] owns the duplex [`Connection`]: buffered framed writes,
//!   demultiplexed reads with synchronous out-of-band dispatch, and the
//!   typed put/get accessors the sender core is written against.
//! - [`flist`] serialises file-list entries with delta-compressed metadata
//!   (xflags, common-prefix name elision) plus segment terminators and the
//!   batch user list.
//! - [`item`] holds the 16-bit item-flag constants exchanged with every
//!   acknowledged index.

pub mod envelope;
pub mod flist;
pub mod index;
pub mod item;
pub mod multiplex;
pub mod varint;

pub use envelope::{EnvelopeError, HEADER_LEN, MAX_PAYLOAD_LENGTH, MPLEX_BASE, MessageCode, MessageHeader};
pub use multiplex::{ChannelError, Connection, MessageHandler};
pub use varint::VarintError;
