//! Block-matching delta engine.
//!
//! For each requested file the receiver supplies its block checksums; the
//! engine slides a window over the local file, screens positions with the
//! weak rolling sum and confirms with the seeded strong digest, emitting a
//! token stream of literal runs and block references. The whole-file MD5
//! accumulates every byte exactly once, in file order.

use std::io::{Read, Write};

use checksums::RollingChecksum;
use checksums::strong::{self, Md5};
use protocol::{ChannelError, Connection, MessageHandler};
use rustc_hash::FxHashMap;

use crate::error::SenderError;
use crate::fileview::FileView;

/// Largest literal run carried by a single token.
pub const LITERAL_CHUNK: usize = 8192;

/// Checksum header the receiver sends ahead of its block checksums.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChecksumHeader {
    /// Number of block checksums that follow.
    pub chunk_count: u32,
    /// Block length; zero means the receiver has no basis file.
    pub block_length: u32,
    /// Strong-digest length in bytes, also used for the whole-file digest.
    pub digest_length: u32,
    /// Length of the final short block, zero if the basis divides evenly.
    pub remainder: u32,
}

impl ChecksumHeader {
    /// Whether the receiver holds no basis and wants the whole file.
    #[must_use]
    pub fn is_new_file(&self) -> bool {
        self.block_length == 0
    }

    /// Reads a header from the channel.
    pub fn receive<S: Read + Write, H: MessageHandler>(
        conn: &mut Connection<S, H>,
    ) -> Result<Self, ChannelError> {
        Ok(Self {
            chunk_count: conn.get_i32()? as u32,
            block_length: conn.get_i32()? as u32,
            digest_length: conn.get_i32()? as u32,
            remainder: conn.get_i32()? as u32,
        })
    }

    /// Echoes the header back to the receiver.
    pub fn send<S: Read + Write, H: MessageHandler>(
        &self,
        conn: &mut Connection<S, H>,
    ) -> Result<(), ChannelError> {
        conn.put_i32(self.chunk_count as i32)?;
        conn.put_i32(self.block_length as i32)?;
        conn.put_i32(self.digest_length as i32)?;
        conn.put_i32(self.remainder as i32)
    }
}

/// One block checksum of the receiver's basis file.
#[derive(Clone, Debug)]
struct TargetChunk {
    length: u32,
    strong: Vec<u8>,
}

/// The receiver's block checksums, indexed by weak sum.
#[derive(Debug)]
pub struct ChecksumIndex {
    header: ChecksumHeader,
    chunks: Vec<TargetChunk>,
    by_weak: FxHashMap<u32, Vec<u32>>,
}

impl ChecksumIndex {
    /// Builds the index from received `(weak, strong)` pairs.
    #[must_use]
    pub fn new(header: ChecksumHeader, pairs: Vec<(u32, Vec<u8>)>) -> Self {
        debug_assert_eq!(pairs.len(), header.chunk_count as usize);
        let mut chunks = Vec::with_capacity(pairs.len());
        let mut by_weak: FxHashMap<u32, Vec<u32>> = FxHashMap::default();

        for (number, (weak, strong)) in pairs.into_iter().enumerate() {
            let number = number as u32;
            let length = if number + 1 == header.chunk_count && header.remainder > 0 {
                header.remainder
            } else {
                header.block_length
            };
            chunks.push(TargetChunk { length, strong });
            by_weak.entry(weak).or_default().push(number);
        }
        Self {
            header,
            chunks,
            by_weak,
        }
    }

    /// Length of the shortest block in the basis; windows below this can
    /// never match.
    #[must_use]
    pub fn smallest_chunk_len(&self) -> usize {
        if self.header.remainder > 0 {
            self.header.remainder.min(self.header.block_length) as usize
        } else {
            self.header.block_length as usize
        }
    }

    /// Block numbers whose weak sum is `weak` and whose length is
    /// `window_len`, with blocks numbered `preferred` and above first so a
    /// receiver reading sequentially keeps matching forward.
    fn candidates(&self, weak: u32, window_len: usize, preferred: u32) -> Vec<u32> {
        let Some(numbers) = self.by_weak.get(&weak) else {
            return Vec::new();
        };
        let mut out: Vec<u32> = numbers
            .iter()
            .copied()
            .filter(|&n| self.chunks[n as usize].length as usize == window_len)
            .collect();
        out.sort_by_key(|&n| (n < preferred, n));
        out
    }

    fn strong_of(&self, number: u32) -> &[u8] {
        &self.chunks[number as usize].strong
    }
}

/// Literal/matched byte totals for one file.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TransferTotals {
    /// Bytes sent verbatim.
    pub literal: u64,
    /// Bytes resolved to block references.
    pub matched: u64,
}

/// Streams the whole file as literal data; used when the receiver has no
/// basis. Returns the full whole-file MD5.
pub fn stream_whole_file<S: Read + Write, H: MessageHandler>(
    conn: &mut Connection<S, H>,
    view: &mut FileView,
    totals: &mut TransferTotals,
) -> Result<[u8; 16], SenderError> {
    let mut md5 = Md5::new();
    loop {
        let len = view.window_len();
        if len == 0 {
            break;
        }
        conn.put_i32(len as i32)?;
        conn.put(view.window())?;
        md5.update(view.window());
        totals.literal += len as u64;
        view.advance_window();
    }
    conn.put_i32(0)?;
    Ok(md5.finalize())
}

/// Runs the block-matching loop over `view`, emitting match tokens and
/// literal runs. Returns the full whole-file MD5.
pub fn stream_matches_and_data<S: Read + Write, H: MessageHandler>(
    conn: &mut Connection<S, H>,
    view: &mut FileView,
    index: &ChecksumIndex,
    seed: &[u8; 16],
    totals: &mut TransferTotals,
) -> Result<[u8; 16], SenderError> {
    let digest_len = index.header.digest_length as usize;
    let smallest = index.smallest_chunk_len().max(1);
    let mut md5 = Md5::new();
    let mut rolling = RollingChecksum::new();
    rolling.update(view.window());
    let mut preferred: u32 = 0;
    let mut window_strong: Option<[u8; 16]> = None;

    'window: while view.window_len() >= smallest {
        let weak = rolling.value();
        for number in index.candidates(weak, view.window_len(), preferred) {
            let strong =
                window_strong.get_or_insert_with(|| strong::block_digest(view.window(), seed));
            if &strong[..digest_len] != index.strong_of(number) {
                continue;
            }

            // Confirmed match: flush the pending literal run, account the
            // matched window, reference the block.
            send_literal(conn, &mut md5, view.pending(), totals)?;
            view.mark_to_start();
            md5.update(view.window());
            totals.matched += view.window_len() as u64;
            conn.put_i32(-(number as i32 + 1))?;
            preferred = number + 1;

            view.advance_window();
            if view.window_len() > 0 {
                rolling.update_from_block(view.window());
            }
            window_strong = None;
            continue 'window;
        }

        // No match at this position; slide one byte, draining the literal
        // run first if the buffer is out of room.
        if !view.room_to_slide_one() {
            send_literal(conn, &mut md5, view.pending(), totals)?;
            view.mark_to_start();
        }
        let old_len = view.window_len();
        let outgoing = view.window()[0];
        view.slide_one();
        if view.window_len() == old_len {
            rolling.roll(outgoing, view.window()[old_len - 1])?;
        } else {
            rolling.pop(outgoing)?;
        }
        window_strong = None;
    }

    // Trailing literal: whatever is left of the run plus the final short
    // window.
    send_literal(conn, &mut md5, view.pending_and_window(), totals)?;
    conn.put_i32(0)?;
    Ok(md5.finalize())
}

/// Emits `bytes` as literal-run tokens, feeding the whole-file digest.
fn send_literal<S: Read + Write, H: MessageHandler>(
    conn: &mut Connection<S, H>,
    md5: &mut Md5,
    bytes: &[u8],
    totals: &mut TransferTotals,
) -> Result<(), SenderError> {
    for chunk in bytes.chunks(LITERAL_CHUNK) {
        conn.put_i32(chunk.len() as i32)?;
        conn.put(chunk)?;
    }
    md5.update(bytes);
    totals.literal += bytes.len() as u64;
    Ok(())
}
