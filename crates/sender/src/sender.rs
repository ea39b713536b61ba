//! The sender driver: a single-threaded state machine coordinating list
//! expansion, per-file requests and teardown over one duplex channel.

use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use flist::{FileInfo, FileList, Lookup, PARTIAL_FILE_LIST_SIZE, Scanner, Segment, SegmentBuilder};
use protocol::flist::{FileEntryEncoder, IOERR_GENERAL, IOERR_VANISHED, WireEntry, encode_user_list};
use protocol::index::{DONE, EOF, OFFSET};
use protocol::{Connection, MessageCode, item};

use crate::config::{FileSelection, SenderConfig};
use crate::delta::{self, ChecksumHeader, ChecksumIndex, TransferTotals};
use crate::error::SenderError;
use crate::fileview::FileView;
use crate::messages::PeerMessages;
use crate::stats::Statistics;

/// Largest block length a receiver may ask for.
const MAX_BLOCK_LENGTH: u32 = 1 << 17;

/// Outcome of a completed sender session.
#[derive(Clone, Debug)]
pub struct SenderSummary {
    /// Whether the initial list was built cleanly and no I/O errors
    /// accumulated on either side.
    pub success: bool,
    /// Final statistics counters.
    pub stats: Statistics,
}

/// Session lifecycle; advances only forward.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum ConnectionPhase {
    Transfer,
    TearingDown,
    Done,
}

impl ConnectionPhase {
    fn advance(&mut self) {
        *self = match self {
            Self::Transfer => Self::TearingDown,
            Self::TearingDown | Self::Done => Self::Done,
        };
    }
}

/// The sending side of one rsync session.
pub struct Sender<S: Read + Write> {
    conn: Connection<S, PeerMessages>,
    cfg: SenderConfig,
    roots: Vec<PathBuf>,
    scanner: Scanner,
    list: FileList,
    encoder: FileEntryEncoder,
    stats: Statistics,
    transmitted: Bitset,
    phase: ConnectionPhase,
    /// Local accumulated I/O-error bits (`IOERR_*`).
    io_error: i32,
    initial_list_ok: bool,
    in_flight: usize,
    segments_emitted: usize,
    eof_sent: bool,
    interrupt: Option<Arc<AtomicBool>>,
}

impl<S: Read + Write> Sender<S> {
    /// Creates a sender for `roots` over `stream`.
    pub fn new(stream: S, roots: Vec<PathBuf>, cfg: SenderConfig) -> Self {
        let recursive = cfg.file_selection == FileSelection::Recurse;
        let mut conn = Connection::new(stream, PeerMessages::default());
        let interrupt = if cfg.interruptible {
            let flag = Arc::new(AtomicBool::new(false));
            conn.set_interrupt_flag(Arc::clone(&flag));
            Some(flag)
        } else {
            None
        };

        Self {
            conn,
            scanner: Scanner::new(cfg.charset, cfg.preserve_user),
            list: FileList::new(recursive),
            encoder: FileEntryEncoder::new(cfg.preserve_user, recursive),
            cfg,
            roots,
            stats: Statistics::default(),
            transmitted: Bitset::default(),
            phase: ConnectionPhase::Transfer,
            io_error: 0,
            initial_list_ok: true,
            in_flight: 0,
            segments_emitted: 0,
            eof_sent: false,
            interrupt,
        }
    }

    /// Flag that cancels the session cooperatively when set. Present only
    /// when the configuration asked for an interruptible sender.
    pub fn interrupt_handle(&self) -> Option<Arc<AtomicBool>> {
        self.interrupt.clone()
    }

    /// Runs the session to completion.
    ///
    /// `Ok` carries the success flag and final statistics; `Err` means the
    /// session itself failed (protocol violation, transport failure or
    /// interruption). Statistics are finalised on every exit path.
    pub fn run(mut self) -> Result<SenderSummary, SenderError> {
        let result = self.execute();
        self.finalise_stats();
        let success = result?;
        Ok(SenderSummary {
            success,
            stats: self.stats,
        })
    }

    fn finalise_stats(&mut self) {
        self.stats.total_bytes_read = self.conn.bytes_read();
        self.stats.total_bytes_written = self.conn.bytes_written();
        self.stats.num_files = self.list.num_files();
        self.stats.total_file_size = self.list.total_file_size();
    }

    fn execute(&mut self) -> Result<bool, SenderError> {
        if self.cfg.receive_filter_rules {
            let rule_bytes = self.conn.get_i32()?;
            if rule_bytes != 0 {
                return Err(SenderError::protocol(format!(
                    "unexpected filter rules on the wire ({rule_bytes} bytes)"
                )));
            }
        }

        let build_started = Instant::now();
        let initial = self.build_initial_segment();
        let build_ms = build_started.elapsed().as_millis() as u64;
        self.stats.file_list_build_time_ms = build_ms.max(1);

        let transfer_started = Instant::now();
        let initial_empty = initial.is_empty();
        let initial_error = initial.io_error;
        let segment = self.list.new_segment(initial.builder);
        self.in_flight += segment.len();
        self.segments_emitted += 1;
        Self::emit_segment_metadata(
            &mut self.conn,
            &mut self.encoder,
            &mut self.stats,
            self.cfg.safe_file_list,
            segment,
            initial_error,
        )?;

        if self.cfg.preserve_user && self.cfg.file_selection == FileSelection::Exact {
            self.emit_user_list()?;
        }
        self.conn.flush()?;
        self.stats.file_list_transfer_time_ms = transfer_started.elapsed().as_millis() as u64;

        if initial_empty && self.cfg.exit_early_if_empty_list {
            tracing::debug!("initial file list is empty, exiting early");
            self.conn.flush()?;
            self.conn.drain_until_eof()?;
            return Ok(self.session_succeeded());
        }

        while self.phase != ConnectionPhase::Done {
            self.refill_file_list()?;

            if self.list_is_recursive()
                && !self.list.is_expandable()
                && !self.eof_sent
            {
                self.conn.write_index(EOF)?;
                self.eof_sent = true;
            }

            let index = self.conn.read_index()?;
            if index == DONE {
                self.handle_done_from_peer()?;
            } else if index >= 0 {
                self.handle_peer_index(index)?;
            } else {
                return Err(SenderError::protocol(format!(
                    "unexpected negative index {index} from receiver"
                )));
            }
        }

        if self.io_error != 0 {
            self.conn
                .send_message(MessageCode::IoError, &self.io_error.to_le_bytes())?;
        }
        self.conn.write_index(DONE)?;
        if self.cfg.send_statistics {
            self.conn.put_varlong(self.conn.bytes_read() as i64, 3)?;
            self.conn.put_varlong(self.conn.bytes_written() as i64, 3)?;
            self.conn
                .put_varlong(self.list.total_file_size() as i64, 3)?;
            self.conn
                .put_varlong(self.stats.file_list_build_time_ms as i64, 3)?;
            self.conn
                .put_varlong(self.stats.file_list_transfer_time_ms as i64, 3)?;
        }

        let goodbye = self.conn.read_index()?;
        if goodbye != DONE {
            return Err(SenderError::protocol(format!(
                "expected final DONE from receiver, got index {goodbye}"
            )));
        }
        if self.cfg.exit_after_eof {
            self.conn.drain_until_eof()?;
        } else {
            self.conn.flush()?;
        }
        Ok(self.session_succeeded())
    }

    fn session_succeeded(&self) -> bool {
        self.initial_list_ok
            && self.io_error == 0
            && self.conn.handler().remote_io_error() == 0
    }

    fn list_is_recursive(&self) -> bool {
        self.cfg.file_selection == FileSelection::Recurse
    }

    // ---- file-list pipeline ----

    fn build_initial_segment(&mut self) -> InitialSegment {
        let mut entries: Vec<FileInfo> = Vec::new();
        let mut io_error = false;

        let roots = std::mem::take(&mut self.roots);
        for root in &roots {
            match self.scanner.stat_root(root) {
                Ok(info) if info.is_directory() => match self.cfg.file_selection {
                    FileSelection::Recurse => entries.push(info),
                    FileSelection::Exact if info.is_dot_dir() => {
                        let scan = self.scanner.list_directory(&info);
                        io_error |= scan.io_error;
                        self.initial_list_ok &= scan.names_ok;
                        entries.push(info);
                        entries.extend(scan.entries);
                    }
                    FileSelection::Exact => {
                        tracing::info!(path = %root.display(), "skipping directory (no recursion)");
                    }
                },
                Ok(info) => entries.push(info),
                Err(flist::ScanError::Encoding { path }) => {
                    tracing::warn!(path = %path.display(), "dropping root with unencodable name");
                    self.initial_list_ok = false;
                }
                Err(flist::ScanError::Stat { path, source }) => {
                    tracing::warn!(path = %path.display(), error = %source, "failed to stat root");
                    io_error = true;
                }
            }
        }
        self.roots = roots;

        if io_error {
            self.io_error |= IOERR_GENERAL;
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let mut builder = SegmentBuilder::initial();
        builder.add_all(entries);
        InitialSegment { builder, io_error }
    }

    /// Expands stub directories while the peer has headroom: eagerly right
    /// after the initial segment, afterwards whenever the in-flight count
    /// drops below half the window, stopping at the full window.
    fn refill_file_list(&mut self) -> Result<(), SenderError> {
        if !self.list.is_expandable() {
            return Ok(());
        }
        if self.segments_emitted > 1 && self.in_flight >= PARTIAL_FILE_LIST_SIZE / 2 {
            return Ok(());
        }

        while self.in_flight < PARTIAL_FILE_LIST_SIZE {
            let Some((dir_index, dir)) = self.list.pop_stub() else {
                break;
            };
            self.conn.write_index(OFFSET - dir_index)?;

            let scan = self.scanner.list_directory(&dir);
            self.initial_list_ok &= scan.names_ok;
            let failed = scan.io_error;
            if failed {
                self.io_error |= IOERR_GENERAL;
            }

            let mut builder = SegmentBuilder::for_directory(dir_index, dir);
            builder.add_all(scan.entries);
            let segment = self.list.new_segment(builder);
            self.in_flight += segment.len();
            self.segments_emitted += 1;
            Self::emit_segment_metadata(
                &mut self.conn,
                &mut self.encoder,
                &mut self.stats,
                self.cfg.safe_file_list,
                segment,
                failed,
            )?;
        }
        Ok(())
    }

    fn emit_segment_metadata(
        conn: &mut Connection<S, PeerMessages>,
        encoder: &mut FileEntryEncoder,
        stats: &mut Statistics,
        safe_file_list: bool,
        segment: &Segment,
        failed: bool,
    ) -> Result<(), SenderError> {
        let mut out = Vec::new();
        for (_, info) in segment.iter() {
            let entry = WireEntry {
                name: &info.name,
                size: info.size,
                mtime: info.mtime,
                mode: info.mode,
                uid: info.user.uid,
                user_name: info.user.name.as_deref().map(str::as_bytes),
                top_dir: info.top_level,
            };
            encoder.encode_entry(&mut out, &entry);
        }
        if failed && safe_file_list {
            FileEntryEncoder::encode_error_end_of_segment(&mut out);
        } else {
            FileEntryEncoder::encode_end_of_segment(&mut out);
        }
        stats.total_file_list_size += out.len() as u64;
        conn.put(&out)?;
        Ok(())
    }

    /// Batch uid→name mappings; only taken in non-recursive sessions,
    /// right after the initial segment.
    fn emit_user_list(&mut self) -> Result<(), SenderError> {
        let mut users: Vec<(u32, Vec<u8>)> = Vec::new();
        if let Some(segment) = self.list.first_segment() {
            for (_, info) in segment.iter() {
                if info.user.uid == 0 {
                    continue;
                }
                if let Some(name) = info.user.name.as_deref() {
                    if !users.iter().any(|(uid, _)| *uid == info.user.uid) {
                        users.push((info.user.uid, name.as_bytes().to_vec()));
                    }
                }
            }
        }

        let mut out = Vec::new();
        encode_user_list(&mut out, users.iter().map(|(uid, name)| (*uid, name.as_slice())));
        self.stats.total_file_list_size += out.len() as u64;
        self.conn.put(&out)?;
        Ok(())
    }

    // ---- peer-driven transfer ----

    fn handle_done_from_peer(&mut self) -> Result<(), SenderError> {
        if self.list_is_recursive() && !self.list.is_empty() {
            if !self.list.first_segment().is_some_and(Segment::is_finished) {
                return Err(SenderError::protocol(
                    "receiver finished a phase with live entries in the oldest segment",
                ));
            }
            if let Some(segment) = self.list.delete_first_segment() {
                self.in_flight -= segment.len().min(self.in_flight);
            }
            if !self.list.is_empty() {
                self.conn.write_index(DONE)?;
                return Ok(());
            }
        }

        self.phase.advance();
        tracing::debug!(phase = ?self.phase, "receiver finished a phase");
        if self.phase != ConnectionPhase::Done {
            self.conn.write_index(DONE)?;
        }
        Ok(())
    }

    fn handle_peer_index(&mut self, index: i32) -> Result<(), SenderError> {
        let iflags = self.conn.get_u16()?;
        if !item::is_valid(iflags) {
            return Err(SenderError::protocol(format!(
                "unknown item flags {iflags:#06x} for index {index}"
            )));
        }

        if iflags & item::TRANSFER == 0 {
            return self.acknowledge_metadata_only(index, iflags);
        }
        if self.phase != ConnectionPhase::Transfer {
            return Err(SenderError::protocol(format!(
                "transfer request for index {index} while tearing down"
            )));
        }
        self.transfer_file(index, iflags)
    }

    /// The receiver already has this entry; prune it and echo the
    /// acknowledgement.
    fn acknowledge_metadata_only(&mut self, index: i32, iflags: u16) -> Result<(), SenderError> {
        match self.list.resolve(index) {
            Lookup::Entry { segment, .. } => {
                segment.remove(index);
            }
            Lookup::DirAnchor { .. } => {
                // The segment's own directory entry stays until the
                // segment is retired as a whole.
            }
            Lookup::NotFound => {
                tracing::debug!(index, "acknowledgement for an already-pruned entry");
            }
        }
        self.conn.write_index(index)?;
        self.conn.put_u16(iflags)?;
        Ok(())
    }

    fn transfer_file(&mut self, index: i32, iflags: u16) -> Result<(), SenderError> {
        let info = match self.list.resolve(index) {
            Lookup::Entry { info, .. } if info.is_regular() => info,
            Lookup::Entry { .. } | Lookup::DirAnchor { .. } => {
                return Err(SenderError::protocol(format!(
                    "transfer request for non-regular entry at index {index}"
                )));
            }
            Lookup::NotFound => {
                return Err(SenderError::protocol(format!(
                    "transfer request for unknown index {index}"
                )));
            }
        };

        let header = ChecksumHeader::receive(&mut self.conn)?;
        validate_header(&header, index)?;
        let mut pairs = Vec::with_capacity(header.chunk_count.min(1 << 16) as usize);
        for _ in 0..header.chunk_count {
            let weak = self.conn.get_i32()? as u32;
            let strong = self.conn.get_bytes(header.digest_length as usize)?;
            pairs.push((weak, strong));
        }

        self.conn.write_index(index)?;
        self.conn.put_u16(iflags)?;
        header.send(&mut self.conn)?;

        let block_len = if header.is_new_file() {
            delta::LITERAL_CHUNK
        } else {
            header.block_length as usize
        };
        let mut view = match FileView::open(&info.path, info.size.max(0) as u64, block_len) {
            Ok(view) => view,
            Err(err) => {
                return self.skip_unreadable_file(index, &info, &err);
            }
        };

        let mut totals = TransferTotals::default();
        let digest = if header.is_new_file() {
            delta::stream_whole_file(&mut self.conn, &mut view, &mut totals)?
        } else {
            let checksums = ChecksumIndex::new(header, pairs);
            delta::stream_matches_and_data(
                &mut self.conn,
                &mut view,
                &checksums,
                &self.cfg.checksum_seed,
                &mut totals,
            )?
        };
        self.stats.total_literal_size += totals.literal;
        self.stats.total_matched_size += totals.matched;

        let mut digest = digest;
        match view.close() {
            Ok(()) => {
                if !self.transmitted.set(index) {
                    self.stats.num_transferred_files += 1;
                    self.stats.total_transferred_size += info.size.max(0) as u64;
                }
            }
            Err(err) => {
                // Deliberate corruption: the digest mismatch makes the
                // receiver discard the reconstruction and redrive the file.
                tracing::warn!(path = %info.path.display(), error = %err, "read error during transfer, corrupting digest");
                digest[0] = digest[0].wrapping_add(1);
            }
        }
        self.conn.put(&digest[..header.digest_length as usize])?;
        Ok(())
    }

    /// Open failed: tell the receiver this index will not arrive and keep
    /// the session going.
    fn skip_unreadable_file(
        &mut self,
        index: i32,
        info: &FileInfo,
        err: &io::Error,
    ) -> Result<(), SenderError> {
        if err.kind() == io::ErrorKind::NotFound {
            tracing::warn!(path = %info.path.display(), "file vanished before transfer");
            self.io_error |= IOERR_VANISHED;
        } else {
            tracing::warn!(path = %info.path.display(), error = %err, "cannot open file for transfer");
            self.io_error |= IOERR_GENERAL;
        }

        self.conn
            .send_message(MessageCode::NoSend, &index.to_le_bytes())?;
        if let Lookup::Entry { segment, .. } = self.list.resolve(index) {
            segment.remove(index);
        }
        Ok(())
    }
}

fn validate_header(header: &ChecksumHeader, index: i32) -> Result<(), SenderError> {
    if header.block_length > MAX_BLOCK_LENGTH {
        return Err(SenderError::protocol(format!(
            "checksum header for index {index} has oversized block length {}",
            header.block_length
        )));
    }
    if header.chunk_count > i32::MAX as u32 {
        return Err(SenderError::protocol(format!(
            "checksum header for index {index} has negative chunk count"
        )));
    }
    if !(1..=16).contains(&header.digest_length) {
        return Err(SenderError::protocol(format!(
            "checksum header for index {index} has digest length {} outside 1..=16",
            header.digest_length
        )));
    }
    if header.remainder >= header.block_length.max(1) {
        return Err(SenderError::protocol(format!(
            "checksum header for index {index} has remainder {} not below block length {}",
            header.remainder, header.block_length
        )));
    }
    if header.chunk_count > 0 && header.block_length == 0 {
        return Err(SenderError::protocol(format!(
            "checksum header for index {index} carries chunks without a block length"
        )));
    }
    Ok(())
}

struct InitialSegment {
    builder: SegmentBuilder,
    io_error: bool,
}

impl InitialSegment {
    fn is_empty(&self) -> bool {
        self.builder.is_empty()
    }
}

/// Monotone bitset over non-negative indices: records which files have
/// been sent completely at least once.
#[derive(Debug, Default)]
struct Bitset {
    words: Vec<u64>,
}

impl Bitset {
    /// Sets the bit, returning whether it was already set.
    fn set(&mut self, index: i32) -> bool {
        let index = index as usize;
        let word = index / 64;
        let bit = 1u64 << (index % 64);
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let was_set = self.words[word] & bit != 0;
        self.words[word] |= bit;
        was_set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_advances_forward_only() {
        let mut phase = ConnectionPhase::Transfer;
        phase.advance();
        assert_eq!(phase, ConnectionPhase::TearingDown);
        phase.advance();
        assert_eq!(phase, ConnectionPhase::Done);
        phase.advance();
        assert_eq!(phase, ConnectionPhase::Done);
    }

    #[test]
    fn bitset_reports_prior_state() {
        let mut bits = Bitset::default();
        assert!(!bits.set(3));
        assert!(bits.set(3));
        assert!(!bits.set(100));
        assert!(bits.set(100));
    }

    #[test]
    fn header_validation_rejects_nonsense() {
        let good = ChecksumHeader {
            chunk_count: 2,
            block_length: 700,
            digest_length: 16,
            remainder: 100,
        };
        assert!(validate_header(&good, 0).is_ok());

        let oversized = ChecksumHeader {
            block_length: MAX_BLOCK_LENGTH + 1,
            ..good
        };
        assert!(validate_header(&oversized, 0).is_err());

        let bad_digest = ChecksumHeader {
            digest_length: 17,
            ..good
        };
        assert!(validate_header(&bad_digest, 0).is_err());

        let bad_remainder = ChecksumHeader {
            remainder: 700,
            ..good
        };
        assert!(validate_header(&bad_remainder, 0).is_err());

        let chunks_without_block = ChecksumHeader {
            chunk_count: 1,
            block_length: 0,
            remainder: 0,
            ..good
        };
        assert!(validate_header(&chunks_without_block, 0).is_err());
    }
}
