use std::collections::VecDeque;
use std::sync::Arc;

use crate::entry::{FileInfo, FileKind};

/// A contiguous batch of file-list entries sent as one unit.
///
/// Indices are global and dense: the segment covers
/// `[begin_index, end_index)`. Entries are removed as the receiver signals
/// it is done with them; a segment with no live entries left is finished.
#[derive(Debug)]
pub struct Segment {
    directory: Option<Arc<FileInfo>>,
    /// Global index of the owning directory entry, which lives in an
    /// earlier segment. `None` for the initial segment.
    dir_index: Option<i32>,
    begin: i32,
    entries: Vec<Option<Arc<FileInfo>>>,
    live: usize,
}

impl Segment {
    /// The directory this segment expands, if any.
    #[must_use]
    pub fn directory(&self) -> Option<&Arc<FileInfo>> {
        self.directory.as_ref()
    }

    /// Global index of the owning directory entry.
    #[must_use]
    pub fn dir_index(&self) -> Option<i32> {
        self.dir_index
    }

    /// First index of the segment's dense range.
    #[must_use]
    pub fn begin_index(&self) -> i32 {
        self.begin
    }

    /// One past the last index of the segment's dense range.
    #[must_use]
    pub fn end_index(&self) -> i32 {
        self.begin + self.entries.len() as i32
    }

    /// Number of entries the segment was built with.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the segment was built without any entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether `index` falls inside the segment's dense range.
    #[must_use]
    pub fn contains(&self, index: i32) -> bool {
        index >= self.begin && index < self.end_index()
    }

    /// Looks up a live entry by global index.
    #[must_use]
    pub fn get(&self, index: i32) -> Option<&Arc<FileInfo>> {
        if !self.contains(index) {
            return None;
        }
        self.entries[(index - self.begin) as usize].as_ref()
    }

    /// Removes a live entry once the receiver is done with it.
    pub fn remove(&mut self, index: i32) -> Option<Arc<FileInfo>> {
        if !self.contains(index) {
            return None;
        }
        let slot = &mut self.entries[(index - self.begin) as usize];
        let removed = slot.take();
        if removed.is_some() {
            self.live -= 1;
        }
        removed
    }

    /// Whether no live entries remain.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.live == 0
    }

    /// Iterates the live entries in index order.
    pub fn iter(&self) -> impl Iterator<Item = (i32, &Arc<FileInfo>)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(offset, slot)| slot.as_ref().map(|info| (self.begin + offset as i32, info)))
    }
}

/// Collects entries for one segment, preserving insertion order.
#[derive(Debug, Default)]
pub struct SegmentBuilder {
    directory: Option<(i32, Arc<FileInfo>)>,
    files: Vec<FileInfo>,
}

impl SegmentBuilder {
    /// Builder for the initial segment, which has no owning directory.
    #[must_use]
    pub fn initial() -> Self {
        Self::default()
    }

    /// Builder for the expansion of the stub directory at `dir_index`.
    #[must_use]
    pub fn for_directory(dir_index: i32, directory: Arc<FileInfo>) -> Self {
        Self {
            directory: Some((dir_index, directory)),
            files: Vec::new(),
        }
    }

    /// Appends one entry.
    pub fn add(&mut self, info: FileInfo) {
        self.files.push(info);
    }

    /// Appends every entry of `infos` in order.
    pub fn add_all(&mut self, infos: impl IntoIterator<Item = FileInfo>) {
        self.files.extend(infos);
    }

    /// Number of entries collected so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether no entries were collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Result of resolving a global index against the list.
#[derive(Debug)]
pub enum Lookup<'a> {
    /// A live entry inside a segment's dense range.
    Entry {
        /// Segment holding the entry.
        segment: &'a mut Segment,
        /// The entry itself.
        info: Arc<FileInfo>,
    },
    /// The index names a segment's own directory whose listing entry has
    /// already been retired with its original segment.
    DirAnchor {
        /// The directory entry.
        info: Arc<FileInfo>,
    },
    /// No live entry carries this index.
    NotFound,
}

/// Append-only, segment-oriented file list.
#[derive(Debug)]
pub struct FileList {
    segments: VecDeque<Segment>,
    stubs: VecDeque<(i32, Arc<FileInfo>)>,
    next_index: i32,
    recursive: bool,
    num_files: usize,
    total_file_size: u64,
}

impl FileList {
    /// Creates an empty list. In recursive mode directory entries are
    /// queued for later expansion as they are added.
    #[must_use]
    pub fn new(recursive: bool) -> Self {
        Self {
            segments: VecDeque::new(),
            stubs: VecDeque::new(),
            next_index: 0,
            recursive,
            num_files: 0,
            total_file_size: 0,
        }
    }

    /// Installs a new segment, assigning it the next dense index range.
    pub fn new_segment(&mut self, builder: SegmentBuilder) -> &Segment {
        let begin = self.next_index;
        let mut entries = Vec::with_capacity(builder.files.len());
        for info in builder.files {
            let info = Arc::new(info);
            let index = self.next_index;
            self.next_index += 1;

            self.num_files += 1;
            if info.kind == FileKind::Regular {
                self.total_file_size += info.size.max(0) as u64;
            }
            if self.recursive && info.is_directory() {
                self.stubs.push_back((index, Arc::clone(&info)));
            }
            entries.push(Some(info));
        }

        let live = entries.len();
        let (dir_index, directory) = match builder.directory {
            Some((index, dir)) => (Some(index), Some(dir)),
            None => (None, None),
        };
        self.segments.push_back(Segment {
            directory,
            dir_index,
            begin,
            entries,
            live,
        });
        self.segments.back().expect("segment was just pushed")
    }

    /// Whether any stub directory awaits expansion.
    #[must_use]
    pub fn is_expandable(&self) -> bool {
        !self.stubs.is_empty()
    }

    /// Takes the next stub directory to expand: its global index and entry.
    pub fn pop_stub(&mut self) -> Option<(i32, Arc<FileInfo>)> {
        self.stubs.pop_front()
    }

    /// The oldest unretired segment.
    #[must_use]
    pub fn first_segment(&self) -> Option<&Segment> {
        self.segments.front()
    }

    /// Retires the oldest segment, returning it so the caller can deduct
    /// its in-flight count. Only legal once the receiver has confirmed the
    /// segment is finished.
    pub fn delete_first_segment(&mut self) -> Option<Segment> {
        self.segments.pop_front()
    }

    /// Whether no segments remain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Total number of entries ever added.
    #[must_use]
    pub fn num_files(&self) -> usize {
        self.num_files
    }

    /// Sum of the sizes of all regular files ever added.
    #[must_use]
    pub fn total_file_size(&self) -> u64 {
        self.total_file_size
    }

    /// Resolves a global index to its segment and entry.
    pub fn resolve(&mut self, index: i32) -> Lookup<'_> {
        if let Some(pos) = self.segments.iter().position(|s| s.contains(index)) {
            let segment = &mut self.segments[pos];
            return match segment.get(index).cloned() {
                Some(info) => Lookup::Entry { segment, info },
                None => Lookup::NotFound,
            };
        }

        if let Some(info) = self
            .segments
            .iter()
            .find(|s| s.dir_index() == Some(index))
            .and_then(Segment::directory)
        {
            return Lookup::DirAnchor {
                info: Arc::clone(info),
            };
        }
        Lookup::NotFound
    }
}
