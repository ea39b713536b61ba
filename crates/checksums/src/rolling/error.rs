use thiserror::Error;

/// Failure conditions for rolling-checksum window operations.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum RollingError {
    /// A slide or shrink was attempted while no bytes were in the window.
    #[error("rolling checksum window is empty")]
    EmptyWindow,
    /// The window length no longer fits in the 32-bit arithmetic the
    /// checksum update is defined over.
    #[error("rolling checksum window length {len} exceeds u32 range")]
    WindowTooLarge {
        /// Window length that triggered the failure.
        len: usize,
    },
}
