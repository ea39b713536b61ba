//! Shared harness for driving a [`sender::Sender`] over a scripted
//! in-memory transport and picking the resulting wire bytes apart.

#![allow(dead_code)]

use std::cell::RefCell;
use std::io::{self, Read, Write};
use std::rc::Rc;

use protocol::envelope::{HEADER_LEN, MessageCode, MessageHeader};
use protocol::index::{DONE, IndexDecoder, IndexEncoder};
use protocol::varint;

/// Scripted inbound bytes plus captured outbound bytes. The output buffer
/// is shared so the test keeps a handle after the link moves into the
/// sender. An optional hook fires before the first read, standing in for a
/// racing writer that changes the filesystem between list build and
/// transfer.
pub struct ScriptedLink {
    input: Vec<u8>,
    pos: usize,
    output: Rc<RefCell<Vec<u8>>>,
    on_first_read: Option<Box<dyn FnOnce()>>,
}

impl ScriptedLink {
    pub fn new(input: Vec<u8>) -> Self {
        Self {
            input,
            pos: 0,
            output: Rc::default(),
            on_first_read: None,
        }
    }

    pub fn with_on_first_read(input: Vec<u8>, hook: impl FnOnce() + 'static) -> Self {
        Self {
            on_first_read: Some(Box::new(hook)),
            ..Self::new(input)
        }
    }

    pub fn output(&self) -> Rc<RefCell<Vec<u8>>> {
        Rc::clone(&self.output)
    }
}

impl Read for ScriptedLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(hook) = self.on_first_read.take() {
            hook();
        }
        let n = buf.len().min(self.input.len() - self.pos);
        buf[..n].copy_from_slice(&self.input[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

impl Write for ScriptedLink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.output.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Builds the inbound byte script the receiver side would produce.
#[derive(Default)]
pub struct Script {
    app: Vec<u8>,
    index: IndexEncoder,
}

impl Script {
    pub fn new() -> Self {
        Self {
            app: Vec::new(),
            index: IndexEncoder::default(),
        }
    }

    pub fn index(mut self, value: i32) -> Self {
        self.index.encode(value, &mut self.app);
        self
    }

    pub fn done(self) -> Self {
        self.index(DONE)
    }

    pub fn iflags(mut self, flags: u16) -> Self {
        self.app.extend_from_slice(&flags.to_le_bytes());
        self
    }

    pub fn int(mut self, value: i32) -> Self {
        self.app.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn bytes(mut self, bytes: &[u8]) -> Self {
        self.app.extend_from_slice(bytes);
        self
    }

    pub fn checksum_header(self, count: u32, block: u32, digest: u32, remainder: u32) -> Self {
        self.int(count as i32)
            .int(block as i32)
            .int(digest as i32)
            .int(remainder as i32)
    }

    /// Wraps the accumulated application bytes into a single Data frame.
    pub fn into_wire(self) -> Vec<u8> {
        let mut wire = Vec::new();
        if !self.app.is_empty() {
            let header = MessageHeader::new(MessageCode::Data, self.app.len() as u32)
                .expect("script fits one frame");
            wire.extend_from_slice(&header.encode());
            wire.extend_from_slice(&self.app);
        }
        wire
    }
}

/// Outbound traffic split into the demultiplexed application stream and
/// the out-of-band messages, in arrival order.
pub struct Captured {
    pub app: Vec<u8>,
    pub messages: Vec<(MessageCode, Vec<u8>)>,
}

pub fn demux(mut wire: &[u8]) -> Captured {
    let mut app = Vec::new();
    let mut messages = Vec::new();
    while !wire.is_empty() {
        let header = MessageHeader::decode(wire).expect("well-formed outbound frame");
        let end = HEADER_LEN + header.payload_len_usize();
        let payload = &wire[HEADER_LEN..end];
        if header.code() == MessageCode::Data {
            app.extend_from_slice(payload);
        } else {
            messages.push((header.code(), payload.to_vec()));
        }
        wire = &wire[end..];
    }
    Captured { app, messages }
}

/// Cursor over the captured application stream.
pub struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
    index: IndexDecoder,
}

impl<'a> Reader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            bytes,
            pos: 0,
            index: IndexDecoder::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pos == self.bytes.len()
    }

    pub fn u8(&mut self) -> u8 {
        let byte = self.bytes[self.pos];
        self.pos += 1;
        byte
    }

    pub fn u16(&mut self) -> u16 {
        u16::from_le_bytes([self.u8(), self.u8()])
    }

    pub fn i32(&mut self) -> i32 {
        let mut raw = [0u8; 4];
        for slot in &mut raw {
            *slot = self.u8();
        }
        i32::from_le_bytes(raw)
    }

    pub fn take(&mut self, len: usize) -> &'a [u8] {
        let out = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        out
    }

    pub fn varlong(&mut self, min_bytes: u8) -> i64 {
        let (value, used) =
            varint::decode_long(&self.bytes[self.pos..], min_bytes).expect("well-formed varint");
        self.pos += used;
        value
    }

    pub fn varint(&mut self) -> i32 {
        let (value, used) =
            varint::decode_int(&self.bytes[self.pos..]).expect("well-formed varint");
        self.pos += used;
        value
    }

    pub fn index(&mut self) -> i32 {
        let mut decoder = std::mem::take(&mut self.index);
        let value = decoder
            .decode(|| {
                if self.pos == self.bytes.len() {
                    return Err(());
                }
                Ok(self.u8())
            })
            .expect("well-formed index");
        self.index = decoder;
        value
    }
}

/// A decoded file-list entry, as far as the test parser reconstructs it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ParsedEntry {
    pub name: Vec<u8>,
    pub size: i64,
    pub xflags: u16,
}

/// End of one segment as observed on the wire.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SegmentEnd {
    Ok,
    IoError(i32),
}

/// Parses entries up to and including the segment terminator. Assumes the
/// session does not preserve users.
pub fn parse_segment(reader: &mut Reader<'_>, prev_name: &mut Vec<u8>) -> (Vec<ParsedEntry>, SegmentEnd) {
    use protocol::flist::{
        XFLAG_EXTENDED_FLAGS, XFLAG_IO_ERROR_ENDLIST, XFLAG_LONG_NAME, XFLAG_SAME_MODE,
        XFLAG_SAME_NAME, XFLAG_SAME_TIME,
    };

    let mut entries = Vec::new();
    loop {
        let first = reader.u8();
        if first == 0 {
            return (entries, SegmentEnd::Ok);
        }
        let mut xflags = u16::from(first);
        if xflags & XFLAG_EXTENDED_FLAGS != 0 {
            xflags |= u16::from(reader.u8()) << 8;
        }
        if xflags & XFLAG_IO_ERROR_ENDLIST != 0 {
            return (entries, SegmentEnd::IoError(reader.varint()));
        }

        let prefix = if xflags & XFLAG_SAME_NAME != 0 {
            usize::from(reader.u8())
        } else {
            0
        };
        let suffix_len = if xflags & XFLAG_LONG_NAME != 0 {
            reader.varint() as usize
        } else {
            usize::from(reader.u8())
        };
        let mut name = prev_name[..prefix].to_vec();
        name.extend_from_slice(reader.take(suffix_len));
        *prev_name = name.clone();

        let size = reader.varlong(3);
        if xflags & XFLAG_SAME_TIME == 0 {
            reader.varlong(4);
        }
        if xflags & XFLAG_SAME_MODE == 0 {
            reader.i32();
        }

        entries.push(ParsedEntry { name, size, xflags });
    }
}

/// One token of the content stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Token {
    Literal(Vec<u8>),
    Match(u32),
}

/// Parses the token stream of one file up to its terminating zero, then
/// takes the trailing digest of `digest_len` bytes.
pub fn parse_tokens(reader: &mut Reader<'_>, digest_len: usize) -> (Vec<Token>, Vec<u8>) {
    let mut tokens = Vec::new();
    loop {
        let token = reader.i32();
        if token == 0 {
            break;
        }
        if token > 0 {
            tokens.push(Token::Literal(reader.take(token as usize).to_vec()));
        } else {
            tokens.push(Token::Match((-token - 1) as u32));
        }
    }
    let digest = reader.take(digest_len).to_vec();
    (tokens, digest)
}

/// Applies a token stream to the receiver's basis blocks, reconstructing
/// the file the way the real receiver would.
pub fn reconstruct(tokens: &[Token], basis: &[u8], block_len: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for token in tokens {
        match token {
            Token::Literal(bytes) => out.extend_from_slice(bytes),
            Token::Match(number) => {
                let start = *number as usize * block_len;
                let end = (start + block_len).min(basis.len());
                out.extend_from_slice(&basis[start..end]);
            }
        }
    }
    out
}

/// Block checksums over `basis` the way the receiver-side generator
/// computes them.
pub fn basis_checksums(basis: &[u8], block_len: usize, seed: &[u8; 16]) -> Vec<(u32, Vec<u8>)> {
    basis
        .chunks(block_len)
        .map(|block| {
            let weak = checksums::RollingChecksum::digest_of(block);
            let strong = checksums::strong::block_digest(block, seed).to_vec();
            (weak, strong)
        })
        .collect()
}
