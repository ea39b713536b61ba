//! Weak rolling checksum used for block matching during delta transfers.

mod checksum;
mod error;

pub use checksum::RollingChecksum;
pub use error::RollingError;
