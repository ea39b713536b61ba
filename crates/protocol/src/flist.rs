//! File-list entry serialisation.
//!
//! Entry metadata is delta-compressed against the previous entry: xflags
//! bits record which fields repeat, names are sent as a shared-prefix
//! length plus suffix. The encoder owns that previous-entry cache; it
//! persists for the lifetime of the connection, across segment boundaries.

use crate::varint;

/// Entry is a top-level item of the transfer.
pub const XFLAG_TOP_DIR: u16 = 1 << 0;
/// Mode equals the previous entry's mode.
pub const XFLAG_SAME_MODE: u16 = 1 << 1;
/// The xflags field itself is 16 bits wide.
pub const XFLAG_EXTENDED_FLAGS: u16 = 1 << 2;
/// Uid equals the previous entry's uid.
pub const XFLAG_SAME_UID: u16 = 1 << 3;
/// Name shares a prefix with the previous entry's name.
pub const XFLAG_SAME_NAME: u16 = 1 << 5;
/// Name suffix is longer than 255 bytes.
pub const XFLAG_LONG_NAME: u16 = 1 << 6;
/// Mtime equals the previous entry's mtime.
pub const XFLAG_SAME_TIME: u16 = 1 << 7;
/// A user-name definition follows the uid.
pub const XFLAG_USER_NAME_FOLLOWS: u16 = 1 << 10;
/// End-of-segment marker carrying an I/O error code.
pub const XFLAG_IO_ERROR_ENDLIST: u16 = 1 << 12;

/// General (unspecified) local I/O failure.
pub const IOERR_GENERAL: i32 = 1 << 0;
/// A listed file vanished before it could be sent.
pub const IOERR_VANISHED: i32 = 1 << 1;

/// Longest transmittable name prefix, suffix-length byte, and user name.
const BYTE_MAX: usize = 255;

/// One file-list entry as it appears on the wire.
#[derive(Clone, Copy, Debug)]
pub struct WireEntry<'a> {
    /// Receiver-relative pathname bytes in the negotiated encoding.
    pub name: &'a [u8],
    /// Size in bytes.
    pub size: i64,
    /// Last-modified time in whole seconds.
    pub mtime: i64,
    /// Mode bits, kind included.
    pub mode: u32,
    /// Owning user id.
    pub uid: u32,
    /// Owning user name in the negotiated encoding, when known.
    pub user_name: Option<&'a [u8]>,
    /// Whether to mark the entry as top-level.
    pub top_dir: bool,
}

/// Delta-encoding serialiser for file-list entries.
#[derive(Debug)]
pub struct FileEntryEncoder {
    prev_name: Vec<u8>,
    prev_mode: u32,
    prev_uid: u32,
    prev_mtime: i64,
    preserve_user: bool,
    inline_user_names: bool,
}

impl FileEntryEncoder {
    /// Creates an encoder with an empty previous-entry cache.
    ///
    /// `inline_user_names` selects the recursive-mode behaviour of sending
    /// user-name definitions inside entries; non-recursive sessions batch
    /// them after the initial segment instead.
    pub fn new(preserve_user: bool, inline_user_names: bool) -> Self {
        Self {
            prev_name: Vec::new(),
            prev_mode: 0,
            prev_uid: 0,
            prev_mtime: 0,
            preserve_user,
            inline_user_names,
        }
    }

    /// Appends the wire form of `entry` to `out`.
    pub fn encode_entry(&mut self, out: &mut Vec<u8>, entry: &WireEntry<'_>) {
        let mut xflags: u16 = 0;

        if entry.top_dir {
            xflags |= XFLAG_TOP_DIR;
        }
        if entry.mode == self.prev_mode {
            xflags |= XFLAG_SAME_MODE;
        }
        if entry.mtime == self.prev_mtime {
            xflags |= XFLAG_SAME_TIME;
        }
        if self.preserve_user && entry.uid == self.prev_uid {
            xflags |= XFLAG_SAME_UID;
        }

        let send_user_name = self.preserve_user
            && self.inline_user_names
            && xflags & XFLAG_SAME_UID == 0
            && entry.user_name.is_some();
        if send_user_name {
            xflags |= XFLAG_USER_NAME_FOLLOWS;
        }

        let prefix = common_prefix(&self.prev_name, entry.name).min(BYTE_MAX);
        if prefix > 0 {
            xflags |= XFLAG_SAME_NAME;
        }
        let suffix = &entry.name[prefix..];
        if suffix.len() > BYTE_MAX {
            xflags |= XFLAG_LONG_NAME;
        }

        if xflags & 0xff00 != 0 || xflags == 0 {
            xflags |= XFLAG_EXTENDED_FLAGS;
            out.extend_from_slice(&xflags.to_le_bytes());
        } else {
            out.push(xflags as u8);
        }

        if xflags & XFLAG_SAME_NAME != 0 {
            out.push(prefix as u8);
        }
        if xflags & XFLAG_LONG_NAME != 0 {
            varint::encode_int(out, suffix.len() as i32);
        } else {
            out.push(suffix.len() as u8);
        }
        out.extend_from_slice(suffix);

        varint::encode_long(out, entry.size, 3);
        if xflags & XFLAG_SAME_TIME == 0 {
            varint::encode_long(out, entry.mtime, 4);
        }
        if xflags & XFLAG_SAME_MODE == 0 {
            out.extend_from_slice(&(entry.mode as i32).to_le_bytes());
        }
        if self.preserve_user && xflags & XFLAG_SAME_UID == 0 {
            varint::encode_int(out, entry.uid as i32);
            if send_user_name {
                if let Some(name) = entry.user_name {
                    let len = name.len().min(BYTE_MAX);
                    out.push(len as u8);
                    out.extend_from_slice(&name[..len]);
                }
            }
        }
        // A symlink target would follow here; this protocol revision
        // reserves the position but never emits one.

        self.prev_name.clear();
        self.prev_name.extend_from_slice(entry.name);
        self.prev_mode = entry.mode;
        self.prev_uid = entry.uid;
        self.prev_mtime = entry.mtime;
    }

    /// Appends the successful end-of-segment marker.
    pub fn encode_end_of_segment(out: &mut Vec<u8>) {
        out.push(0);
    }

    /// Appends the end-of-segment marker reporting a directory-expansion
    /// failure.
    pub fn encode_error_end_of_segment(out: &mut Vec<u8>) {
        let xflags = XFLAG_EXTENDED_FLAGS | XFLAG_IO_ERROR_ENDLIST;
        out.extend_from_slice(&xflags.to_le_bytes());
        varint::encode_int(out, IOERR_GENERAL);
    }
}

/// Appends the batch user list: every non-root uid with its name,
/// terminated by a zero uid.
pub fn encode_user_list<'a>(out: &mut Vec<u8>, users: impl IntoIterator<Item = (u32, &'a [u8])>) {
    for (uid, name) in users {
        if uid == 0 {
            continue;
        }
        varint::encode_int(out, uid as i32);
        let len = name.len().min(BYTE_MAX);
        out.push(len as u8);
        out.extend_from_slice(&name[..len]);
    }
    varint::encode_int(out, 0);
}

/// Length of the longest common prefix of `a` and `b`.
fn common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry<'a>(name: &'a [u8], size: i64, mtime: i64, mode: u32) -> WireEntry<'a> {
        WireEntry {
            name,
            size,
            mtime,
            mode,
            uid: 0,
            user_name: None,
            top_dir: false,
        }
    }

    /// Pulls the xflags value off the front of an encoded entry.
    fn decode_xflags(bytes: &[u8]) -> (u16, usize) {
        let first = u16::from(bytes[0]);
        if first & XFLAG_EXTENDED_FLAGS != 0 {
            (u16::from_le_bytes([bytes[0], bytes[1]]), 2)
        } else {
            (first, 1)
        }
    }

    #[test]
    fn first_entry_sends_every_field() {
        let mut enc = FileEntryEncoder::new(false, false);
        let mut out = Vec::new();
        enc.encode_entry(&mut out, &entry(b"a", 3, 1_700_000_000, 0o100644));

        let (xflags, used) = decode_xflags(&out);
        assert_eq!(xflags & XFLAG_SAME_NAME, 0);
        assert_eq!(xflags & XFLAG_SAME_MODE, 0);
        assert_eq!(xflags & XFLAG_SAME_TIME, 0);
        // suffix-length byte, suffix, 3-byte size minimum follow
        assert_eq!(out[used], 1);
        assert_eq!(out[used + 1], b'a');
        let (size, _) = varint::decode_long(&out[used + 2..], 3).unwrap();
        assert_eq!(size, 3);
    }

    #[test]
    fn repeated_fields_are_elided() {
        let mut enc = FileEntryEncoder::new(false, false);
        let mut first = Vec::new();
        enc.encode_entry(&mut first, &entry(b"dir/a", 1, 42, 0o100644));
        let mut second = Vec::new();
        enc.encode_entry(&mut second, &entry(b"dir/b", 1, 42, 0o100644));

        let (xflags, used) = decode_xflags(&second);
        assert_ne!(xflags & XFLAG_SAME_NAME, 0);
        assert_ne!(xflags & XFLAG_SAME_MODE, 0);
        assert_ne!(xflags & XFLAG_SAME_TIME, 0);
        // prefix length 4 ("dir/"), suffix "b"
        assert_eq!(second[used], 4);
        assert_eq!(second[used + 1], 1);
        assert_eq!(second[used + 2], b'b');
        // nothing after the 3-byte size: mtime and mode were elided
        assert_eq!(second.len(), used + 3 + 3);
    }

    #[test]
    fn prefix_reconstruction_matches_original_names() {
        let names: [&[u8]; 4] = [b"a/b/c", b"a/b/d", b"a/x", b"zzz"];
        let mut enc = FileEntryEncoder::new(false, false);
        let mut prev: Vec<u8> = Vec::new();

        for name in names {
            let mut out = Vec::new();
            enc.encode_entry(&mut out, &entry(name, 0, 0, 0o100644));
            let (xflags, mut pos) = decode_xflags(&out);

            let prefix = if xflags & XFLAG_SAME_NAME != 0 {
                let p = usize::from(out[pos]);
                pos += 1;
                p
            } else {
                0
            };
            let suffix_len = usize::from(out[pos]);
            pos += 1;
            let mut reconstructed = prev[..prefix].to_vec();
            reconstructed.extend_from_slice(&out[pos..pos + suffix_len]);
            assert_eq!(reconstructed, name);
            assert!(prefix <= 255);
            prev = reconstructed;
        }
    }

    #[test]
    fn long_suffix_uses_varint_length() {
        let long_name = vec![b'x'; 300];
        let mut enc = FileEntryEncoder::new(false, false);
        let mut out = Vec::new();
        enc.encode_entry(
            &mut out,
            &entry(&long_name, 0, 0, 0o100644),
        );

        let (xflags, used) = decode_xflags(&out);
        assert_ne!(xflags & XFLAG_LONG_NAME, 0);
        let (len, _) = varint::decode_int(&out[used..]).unwrap();
        assert_eq!(len, 300);
    }

    #[test]
    fn zero_xflags_is_widened_with_extended_marker() {
        let mut enc = FileEntryEncoder::new(false, false);
        // Prime the cache so a same-everything entry with a fresh name
        // would otherwise produce xflags == 0.
        let mut out = Vec::new();
        enc.encode_entry(&mut out, &entry(b"abc", 0, 7, 0o100644));

        // Fresh name, changed mtime and mode: nothing repeats, so the raw
        // flag value would be zero.
        let mut second = Vec::new();
        enc.encode_entry(&mut second, &entry(b"zzz", 0, 8, 0o100755));
        let (xflags, width) = decode_xflags(&second);
        assert_eq!(width, 2);
        assert_eq!(xflags, XFLAG_EXTENDED_FLAGS);
    }

    #[test]
    fn uid_is_sent_only_when_preserving_user() {
        let base = entry(b"f", 0, 0, 0o100644);

        let mut plain = FileEntryEncoder::new(false, false);
        let mut without = Vec::new();
        plain.encode_entry(&mut without, &WireEntry { uid: 1000, ..base });

        let mut preserving = FileEntryEncoder::new(true, false);
        let mut with = Vec::new();
        preserving.encode_entry(&mut with, &WireEntry { uid: 1000, ..base });

        assert!(with.len() > without.len());
    }

    #[test]
    fn inline_user_name_follows_uid() {
        let mut enc = FileEntryEncoder::new(true, true);
        let mut out = Vec::new();
        enc.encode_entry(
            &mut out,
            &WireEntry {
                uid: 1000,
                user_name: Some(b"alice"),
                ..entry(b"f", 0, 0, 0o100644)
            },
        );

        let (xflags, _) = decode_xflags(&out);
        assert_ne!(xflags & XFLAG_USER_NAME_FOLLOWS, 0);
        let name_start = out.len() - b"alice".len();
        assert_eq!(&out[name_start..], b"alice");
        assert_eq!(out[name_start - 1], 5);
    }

    #[test]
    fn segment_terminators() {
        let mut ok = Vec::new();
        FileEntryEncoder::encode_end_of_segment(&mut ok);
        assert_eq!(ok, vec![0]);

        let mut err = Vec::new();
        FileEntryEncoder::encode_error_end_of_segment(&mut err);
        let xflags = u16::from_le_bytes([err[0], err[1]]);
        assert_eq!(xflags, XFLAG_EXTENDED_FLAGS | XFLAG_IO_ERROR_ENDLIST);
        let (code, _) = varint::decode_int(&err[2..]).unwrap();
        assert_eq!(code, IOERR_GENERAL);
    }

    #[test]
    fn user_list_skips_root_and_terminates_with_zero() {
        let mut out = Vec::new();
        encode_user_list(
            &mut out,
            [(0u32, b"root".as_slice()), (1000, b"alice".as_slice())],
        );

        let (uid, used) = varint::decode_int(&out).unwrap();
        assert_eq!(uid, 1000);
        assert_eq!(out[used], 5);
        assert_eq!(&out[used + 1..used + 6], b"alice");
        let (terminator, _) = varint::decode_int(&out[used + 6..]).unwrap();
        assert_eq!(terminator, 0);
    }
}
