/// Running counters for one sender session.
///
/// `total_literal_size + total_matched_size` equals the summed size of all
/// transferred files; the file-list counters cover the serialised metadata
/// stream only.
#[derive(Clone, Debug, Default)]
pub struct Statistics {
    /// Raw bytes read from the transport, framing included.
    pub total_bytes_read: u64,
    /// Raw bytes written to the transport, framing included.
    pub total_bytes_written: u64,
    /// Entries ever added to the file list.
    pub num_files: usize,
    /// Summed size of all regular files in the list.
    pub total_file_size: u64,
    /// Distinct files whose content was sent completely at least once.
    pub num_transferred_files: usize,
    /// Summed size of those files.
    pub total_transferred_size: u64,
    /// Bytes sent verbatim inside literal runs.
    pub total_literal_size: u64,
    /// Bytes covered by block-match references.
    pub total_matched_size: u64,
    /// Serialised file-list bytes, terminators and user list included.
    pub total_file_list_size: u64,
    /// Time spent building the initial file list, at least 1 ms.
    pub file_list_build_time_ms: u64,
    /// Time spent transmitting the initial file list.
    pub file_list_transfer_time_ms: u64,
}
