use protocol::{ChannelError, MessageCode, MessageHandler};

/// Driver-side handler for out-of-band frames from the receiver.
///
/// Text messages are forwarded to the log; error accumulators are folded
/// into the session's final success flag.
#[derive(Debug, Default)]
pub struct PeerMessages {
    remote_io_error: i32,
}

impl PeerMessages {
    /// I/O-error bits the peer has reported so far.
    pub fn remote_io_error(&self) -> i32 {
        self.remote_io_error
    }
}

impl MessageHandler for PeerMessages {
    fn handle_message(&mut self, code: MessageCode, payload: &[u8]) -> Result<(), ChannelError> {
        match code {
            MessageCode::IoError => {
                let bytes: [u8; 4] = payload
                    .try_into()
                    .map_err(|_| ChannelError::UnexpectedData)?;
                let flags = i32::from_le_bytes(bytes);
                tracing::debug!(flags, "peer reported I/O errors");
                self.remote_io_error |= flags;
                Ok(())
            }
            MessageCode::Info | MessageCode::Log => {
                tracing::info!(target: "peer", "{}", String::from_utf8_lossy(payload));
                Ok(())
            }
            MessageCode::Warning => {
                tracing::warn!(target: "peer", "{}", String::from_utf8_lossy(payload));
                Ok(())
            }
            MessageCode::Error | MessageCode::ErrorXfer => {
                tracing::error!(target: "peer", "{}", String::from_utf8_lossy(payload));
                Ok(())
            }
            // Data never reaches the handler and NoSend only travels
            // towards the receiver.
            MessageCode::Data | MessageCode::NoSend => Err(ChannelError::UnexpectedData),
        }
    }
}
