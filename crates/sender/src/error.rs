use checksums::RollingError;
use protocol::ChannelError;
use thiserror::Error;

/// Fatal sender failures. Per-file I/O and encoding problems are recovered
/// inside the session and surface through the accumulated error bits and
/// the summary's success flag instead.
#[derive(Debug, Error)]
pub enum SenderError {
    /// The peer sent syntactically or semantically invalid data.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// The transport failed or closed mid-session.
    #[error(transparent)]
    Channel(ChannelError),
    /// The cooperative cancellation flag was observed.
    #[error("transfer interrupted")]
    Interrupted,
    /// A rolling-checksum window invariant was broken.
    #[error(transparent)]
    Checksum(#[from] RollingError),
}

impl From<ChannelError> for SenderError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Interrupted => Self::Interrupted,
            // Application bytes where the protocol demands silence are a
            // peer fault, not a transport fault.
            ChannelError::UnexpectedData => {
                Self::Protocol("unexpected data on the channel".to_owned())
            }
            other => Self::Channel(other),
        }
    }
}

impl SenderError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}
