//! uid→name resolution through the system user database.

use rustc_hash::FxHashMap;
use std::ffi::CStr;

/// Memoising wrapper around `getpwuid_r`.
#[derive(Debug, Default)]
pub struct UserDb {
    cache: FxHashMap<u32, Option<String>>,
}

impl UserDb {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `uid` to a user name, caching the answer either way.
    pub fn name_of(&mut self, uid: u32) -> Option<String> {
        self.cache
            .entry(uid)
            .or_insert_with(|| lookup(uid))
            .clone()
    }
}

#[allow(unsafe_code)]
fn lookup(uid: u32) -> Option<String> {
    let mut pwd: libc::passwd = unsafe { std::mem::zeroed() };
    let mut result: *mut libc::passwd = std::ptr::null_mut();
    let mut buf = vec![0u8; 1024];

    loop {
        let rc = unsafe {
            libc::getpwuid_r(
                uid,
                &raw mut pwd,
                buf.as_mut_ptr().cast(),
                buf.len(),
                &raw mut result,
            )
        };
        if rc == libc::ERANGE {
            buf.resize(buf.len() * 2, 0);
            continue;
        }
        if rc != 0 || result.is_null() {
            return None;
        }
        break;
    }

    let name = unsafe { CStr::from_ptr(pwd.pw_name) };
    name.to_str().ok().map(String::from)
}
