//! Bounded sliding read window over a file.
//!
//! The view buffers `[mark, end)`: the accrued literal run between `mark`
//! and the window start, plus the match window `[start, end)` itself. The
//! window never exceeds the configured block length except for the final
//! short tail. Read failures mid-file do not abort the transfer: the
//! affected range is zero-filled, the failure is remembered, and
//! [`FileView::close`] reports it so the driver can corrupt the trailing
//! digest and force the receiver to redrive the file.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Upper bound on the buffered literal run between mark and window.
pub const MAX_PENDING: usize = 128 * 1024;

/// Sliding, bounded-memory read window with mark/slide semantics.
#[derive(Debug)]
pub struct FileView {
    file: File,
    buf: Vec<u8>,
    /// Start of the accrued literal run; `mark <= start`.
    mark: usize,
    /// Window start.
    start: usize,
    /// Window end (exclusive); everything in `[mark, end)` is buffered.
    end: usize,
    /// File bytes not yet pulled into the buffer.
    remaining: u64,
    block_len: usize,
    read_error: Option<io::Error>,
}

impl FileView {
    /// Opens `path` and fills the first window.
    ///
    /// The caller distinguishes a vanished file from other failures via
    /// [`io::Error::kind`].
    pub fn open(path: &Path, size: u64, block_len: usize) -> io::Result<Self> {
        debug_assert!(block_len > 0);
        let file = File::open(path)?;
        let mut view = Self {
            file,
            buf: vec![0; block_len + MAX_PENDING],
            mark: 0,
            start: 0,
            end: 0,
            remaining: size,
            block_len,
            read_error: None,
        };
        view.extend_window();
        Ok(view)
    }

    /// The match window `[start, end)`.
    #[must_use]
    pub fn window(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Window length in bytes.
    #[must_use]
    pub fn window_len(&self) -> usize {
        self.end - self.start
    }

    /// The accrued literal run `[mark, start)`.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.buf[self.mark..self.start]
    }

    /// Everything buffered: the literal run plus the window.
    #[must_use]
    pub fn pending_and_window(&self) -> &[u8] {
        &self.buf[self.mark..self.end]
    }

    /// Moves the mark up to the window start, releasing the literal run.
    pub fn mark_to_start(&mut self) {
        self.mark = self.start;
    }

    /// Whether a one-byte slide fits without draining the literal run
    /// first.
    #[must_use]
    pub fn room_to_slide_one(&self) -> bool {
        (self.start - self.mark) + 1 + self.block_len <= self.buf.len()
    }

    /// Slides the window start by one byte, pulling more data if any is
    /// left. The literal run grows by the byte that left the window.
    pub fn slide_one(&mut self) {
        debug_assert!(self.window_len() >= 1);
        debug_assert!(self.room_to_slide_one());
        self.start += 1;
        self.extend_window();
    }

    /// Jumps the window past its own end after a match: the mark and the
    /// window start both move to the old window end.
    ///
    /// The caller must have drained the literal run first.
    pub fn advance_window(&mut self) {
        debug_assert_eq!(self.mark, self.start, "literal run must be drained");
        self.start = self.end;
        self.mark = self.start;
        self.extend_window();
    }

    /// Extends `end` so the window covers `min(block_len, bytes left)`,
    /// compacting the buffer over the released prefix when needed.
    fn extend_window(&mut self) {
        let buffered = self.end - self.start;
        let target = (self.remaining + buffered as u64).min(self.block_len as u64) as usize;
        if target <= buffered {
            return;
        }
        let mut need_end = self.start + target;

        if need_end > self.buf.len() {
            // Everything below the mark has been consumed; reclaim it.
            let shift = self.mark;
            debug_assert!(need_end - shift <= self.buf.len());
            self.buf.copy_within(self.mark..self.end, 0);
            self.mark = 0;
            self.start -= shift;
            self.end -= shift;
            need_end -= shift;
        }

        while self.end < need_end {
            match self.file.read(&mut self.buf[self.end..need_end]) {
                Ok(0) => {
                    // The file shrank under us; pretend the advertised
                    // bytes exist so the token stream stays coherent.
                    self.record_read_error(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "file shrank during transfer",
                    ));
                    self.zero_fill(need_end);
                    break;
                }
                Ok(n) => {
                    self.end += n;
                    self.remaining -= n as u64;
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    self.record_read_error(err);
                    self.zero_fill(need_end);
                    break;
                }
            }
        }
    }

    fn zero_fill(&mut self, need_end: usize) {
        for slot in &mut self.buf[self.end..need_end] {
            *slot = 0;
        }
        self.remaining -= (need_end - self.end) as u64;
        self.end = need_end;
    }

    fn record_read_error(&mut self, err: io::Error) {
        tracing::warn!(error = %err, "read failure inside file view");
        if self.read_error.is_none() {
            self.read_error = Some(err);
        }
    }

    /// Closes the view, surfacing the first read failure encountered.
    pub fn close(self) -> io::Result<()> {
        match self.read_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }
}
