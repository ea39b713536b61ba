//! Framed, buffered, auto-flushing duplex channel.
//!
//! [`Connection`] owns the byte transport. Outbound application bytes are
//! buffered and shipped as [`MessageCode::Data`] frames; out-of-band
//! messages are serialised between them. Inbound frames are demultiplexed:
//! `Data` payloads merge into the application stream the typed `get`
//! accessors read from, every other code is handed to the registered
//! [`MessageHandler`] synchronously, before the requesting read observes
//! any further application byte.
//!
//! Any read that needs bytes flushes the write buffer first; without that
//! rule both peers can block on full pipes in opposite directions.

use std::io::{self, Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

use crate::envelope::{EnvelopeError, HEADER_LEN, MAX_PAYLOAD_LENGTH, MessageCode, MessageHeader};
use crate::index::{IndexDecoder, IndexEncoder};
use crate::varint::{self, VarintError};

/// Flush threshold for buffered application bytes.
const WRITE_WATERMARK: usize = 32 * 1024;

/// Channel-level failures. All of these are fatal to the session.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The peer closed the stream before the requested bytes arrived.
    #[error("peer closed the stream mid-frame")]
    UnexpectedEof,
    /// Bytes arrived where the protocol requires end-of-stream or silence.
    #[error("unexpected data on the channel")]
    UnexpectedData,
    /// Transport failure.
    #[error("channel I/O failure: {0}")]
    Io(#[from] io::Error),
    /// Malformed frame header.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    /// Malformed variable-length integer.
    #[error(transparent)]
    Varint(#[from] VarintError),
    /// The cooperative cancellation flag was observed.
    #[error("transfer interrupted")]
    Interrupted,
}

/// Receives out-of-band message frames as they arrive.
pub trait MessageHandler {
    /// Handles one message; called before the read that surfaced it
    /// returns. Returning an error tears the session down.
    fn handle_message(&mut self, code: MessageCode, payload: &[u8]) -> Result<(), ChannelError>;
}

/// Framed duplex channel over a blocking byte transport.
pub struct Connection<S, H> {
    stream: S,
    handler: H,
    wbuf: Vec<u8>,
    rbuf: Vec<u8>,
    rpos: usize,
    /// Bytes of the current inbound `Data` frame not yet pulled off the
    /// transport.
    frame_remaining: usize,
    bytes_read: u64,
    bytes_written: u64,
    index_writer: IndexEncoder,
    index_reader: IndexDecoder,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<S: Read + Write, H: MessageHandler> Connection<S, H> {
    /// Wraps `stream`, delivering out-of-band messages to `handler`.
    pub fn new(stream: S, handler: H) -> Self {
        Self {
            stream,
            handler,
            wbuf: Vec::with_capacity(WRITE_WATERMARK),
            rbuf: Vec::new(),
            rpos: 0,
            frame_remaining: 0,
            bytes_read: 0,
            bytes_written: 0,
            index_writer: IndexEncoder::default(),
            index_reader: IndexDecoder::default(),
            interrupt: None,
        }
    }

    /// Installs a cooperative cancellation flag, checked at every
    /// suspension point.
    pub fn set_interrupt_flag(&mut self, flag: Arc<AtomicBool>) {
        self.interrupt = Some(flag);
    }

    /// The registered message handler.
    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Mutable access to the registered message handler.
    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Raw bytes pulled off the transport so far, frame headers included.
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Raw bytes pushed onto the transport so far, frame headers included.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn check_interrupt(&self) -> Result<(), ChannelError> {
        match &self.interrupt {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(ChannelError::Interrupted),
            _ => Ok(()),
        }
    }

    // ---- write side ----

    /// Buffers raw application bytes.
    pub fn put(&mut self, buf: &[u8]) -> Result<(), ChannelError> {
        self.wbuf.extend_from_slice(buf);
        if self.wbuf.len() >= WRITE_WATERMARK {
            self.flush_data_frames()?;
        }
        Ok(())
    }

    /// Buffers one byte.
    pub fn put_u8(&mut self, value: u8) -> Result<(), ChannelError> {
        self.put(&[value])
    }

    /// Buffers a 16-bit little-endian value.
    pub fn put_u16(&mut self, value: u16) -> Result<(), ChannelError> {
        self.put(&value.to_le_bytes())
    }

    /// Buffers a 32-bit little-endian value.
    pub fn put_i32(&mut self, value: i32) -> Result<(), ChannelError> {
        self.put(&value.to_le_bytes())
    }

    /// Buffers a variable-length 32-bit integer.
    pub fn put_varint(&mut self, value: i32) -> Result<(), ChannelError> {
        let mut buf = Vec::with_capacity(5);
        varint::encode_int(&mut buf, value);
        self.put(&buf)
    }

    /// Buffers a variable-length integer with `min_bytes` minimum width.
    pub fn put_varlong(&mut self, value: i64, min_bytes: u8) -> Result<(), ChannelError> {
        let mut buf = Vec::with_capacity(9);
        varint::encode_long(&mut buf, value, min_bytes);
        self.put(&buf)
    }

    /// Buffers the run-length-delta encoding of `index`.
    pub fn write_index(&mut self, index: i32) -> Result<(), ChannelError> {
        let mut buf = Vec::with_capacity(6);
        self.index_writer.encode(index, &mut buf);
        self.put(&buf)
    }

    /// Sends an out-of-band message, serialised after all application
    /// bytes buffered so far.
    pub fn send_message(&mut self, code: MessageCode, payload: &[u8]) -> Result<(), ChannelError> {
        self.flush_data_frames()?;
        tracing::debug!(code = %code, len = payload.len(), "outbound out-of-band frame");
        self.write_frame(code, payload)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Flushes all buffered application bytes to the transport.
    pub fn flush(&mut self) -> Result<(), ChannelError> {
        self.flush_data_frames()?;
        self.stream.flush()?;
        Ok(())
    }

    fn flush_data_frames(&mut self) -> Result<(), ChannelError> {
        self.check_interrupt()?;
        let pending = std::mem::take(&mut self.wbuf);
        for chunk in pending.chunks(MAX_PAYLOAD_LENGTH as usize) {
            self.write_frame(MessageCode::Data, chunk)?;
        }
        self.wbuf = pending;
        self.wbuf.clear();
        Ok(())
    }

    fn write_frame(&mut self, code: MessageCode, payload: &[u8]) -> Result<(), ChannelError> {
        let header = MessageHeader::new(code, payload.len() as u32)?;
        self.stream.write_all(&header.encode())?;
        self.stream.write_all(payload)?;
        self.bytes_written += (HEADER_LEN + payload.len()) as u64;
        Ok(())
    }

    // ---- read side ----

    fn available(&self) -> usize {
        self.rbuf.len() - self.rpos
    }

    /// Makes at least `need` demultiplexed application bytes available,
    /// dispatching any out-of-band frames encountered on the way.
    fn fill(&mut self, need: usize) -> Result<(), ChannelError> {
        if self.available() >= need {
            return Ok(());
        }
        // Reads block until the peer reacts to what we buffered.
        self.flush()?;

        while self.available() < need {
            self.check_interrupt()?;
            if self.frame_remaining == 0 {
                self.read_frame_header()?;
                continue;
            }

            if self.rpos == self.rbuf.len() {
                self.rbuf.clear();
                self.rpos = 0;
            }
            let want = (need - self.available()).min(self.frame_remaining);
            let start = self.rbuf.len();
            self.rbuf.resize(start + want, 0);
            match self.stream.read(&mut self.rbuf[start..]) {
                Ok(0) => {
                    self.rbuf.truncate(start);
                    return Err(ChannelError::UnexpectedEof);
                }
                Ok(n) => {
                    self.rbuf.truncate(start + n);
                    self.frame_remaining -= n;
                    self.bytes_read += n as u64;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                    self.rbuf.truncate(start);
                }
                Err(err) => {
                    self.rbuf.truncate(start);
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    /// Reads one frame header; `Data` arms the payload counter, anything
    /// else is consumed and dispatched immediately.
    fn read_frame_header(&mut self) -> Result<(), ChannelError> {
        let mut head = [0u8; HEADER_LEN];
        self.read_stream_exact(&mut head)?;
        let header = MessageHeader::decode(&head)?;
        if header.code() == MessageCode::Data {
            self.frame_remaining = header.payload_len_usize();
            return Ok(());
        }

        let mut payload = vec![0u8; header.payload_len_usize()];
        self.read_stream_exact(&mut payload)?;
        tracing::trace!(code = %header.code(), len = payload.len(), "inbound out-of-band frame");
        self.handler.handle_message(header.code(), &payload)
    }

    fn read_stream_exact(&mut self, buf: &mut [u8]) -> Result<(), ChannelError> {
        let mut filled = 0;
        while filled < buf.len() {
            self.check_interrupt()?;
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => return Err(ChannelError::UnexpectedEof),
                Ok(n) => {
                    filled += n;
                    self.bytes_read += n as u64;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Reads one application byte.
    pub fn get_u8(&mut self) -> Result<u8, ChannelError> {
        self.fill(1)?;
        let byte = self.rbuf[self.rpos];
        self.rpos += 1;
        Ok(byte)
    }

    /// Reads a 16-bit little-endian value.
    pub fn get_u16(&mut self) -> Result<u16, ChannelError> {
        self.fill(2)?;
        let bytes = [self.rbuf[self.rpos], self.rbuf[self.rpos + 1]];
        self.rpos += 2;
        Ok(u16::from_le_bytes(bytes))
    }

    /// Reads a 32-bit little-endian value.
    pub fn get_i32(&mut self) -> Result<i32, ChannelError> {
        self.fill(4)?;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.rbuf[self.rpos..self.rpos + 4]);
        self.rpos += 4;
        Ok(i32::from_le_bytes(bytes))
    }

    /// Reads exactly `len` application bytes.
    pub fn get_bytes(&mut self, len: usize) -> Result<Vec<u8>, ChannelError> {
        self.fill(len)?;
        let out = self.rbuf[self.rpos..self.rpos + len].to_vec();
        self.rpos += len;
        Ok(out)
    }

    /// Reads a variable-length integer with `min_bytes` minimum width.
    pub fn read_varlong(&mut self, min_bytes: u8) -> Result<i64, ChannelError> {
        let low = self.get_bytes(usize::from(min_bytes) - 1)?;
        let marker = self.get_u8()?;
        let extra = self.get_bytes(varint::extra_bytes(marker))?;
        Ok(varint::assemble(&low, marker, &extra)?)
    }

    /// Reads a variable-length 32-bit integer.
    pub fn read_varint(&mut self) -> Result<i32, ChannelError> {
        let value = self.read_varlong(1)?;
        i32::try_from(value).map_err(|_| ChannelError::Varint(VarintError::Overflow))
    }

    /// Reads one run-length-delta encoded index.
    pub fn read_index(&mut self) -> Result<i32, ChannelError> {
        let mut decoder = std::mem::take(&mut self.index_reader);
        let result = decoder.decode(|| self.get_u8());
        self.index_reader = decoder;
        result
    }

    /// Consumes the inbound stream to end-of-file, dispatching message
    /// frames on the way.
    ///
    /// # Errors
    ///
    /// [`ChannelError::UnexpectedData`] if application bytes arrive; the
    /// protocol requires the peer to stay silent past this point.
    pub fn drain_until_eof(&mut self) -> Result<(), ChannelError> {
        self.flush()?;
        if self.available() > 0 || self.frame_remaining > 0 {
            return Err(ChannelError::UnexpectedData);
        }

        loop {
            self.check_interrupt()?;
            let mut head = [0u8; HEADER_LEN];
            let mut got = 0;
            while got < HEADER_LEN {
                match self.stream.read(&mut head[got..]) {
                    Ok(0) if got == 0 => return Ok(()),
                    Ok(0) => return Err(ChannelError::UnexpectedEof),
                    Ok(n) => {
                        got += n;
                        self.bytes_read += n as u64;
                    }
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                    Err(err) => return Err(err.into()),
                }
            }

            let header = MessageHeader::decode(&head)?;
            if header.code() == MessageCode::Data {
                if header.payload_len() > 0 {
                    return Err(ChannelError::UnexpectedData);
                }
                continue;
            }
            let mut payload = vec![0u8; header.payload_len_usize()];
            self.read_stream_exact(&mut payload)?;
            self.handler.handle_message(header.code(), &payload)?;
        }
    }
}
