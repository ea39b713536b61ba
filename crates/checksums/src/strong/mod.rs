//! Strong digests for block verification and whole-file integrity.
//!
//! Block digests mix the session's checksum seed into the hash so block
//! digests are session-specific; the whole-file digest is plain MD5 over the
//! file content in strict file order.

mod md5;

pub use md5::Md5;

/// Length in bytes of a full MD5 digest.
pub const MD5_LENGTH: usize = 16;

/// Computes the seeded per-block strong digest: `MD5(block || seed)`.
#[must_use]
pub fn block_digest(block: &[u8], seed: &[u8; 16]) -> [u8; MD5_LENGTH] {
    let mut hasher = Md5::new();
    hasher.update(block);
    hasher.update(seed);
    hasher.finalize()
}
