//! Buffer descriptors crossing the application boundary.
//!
//! `StrBuf` is the `{maxlen, len, buf}` triple from the application API:
//! the host hands one in to `putmsg`, gets one filled in by `getmsg`.
//! `EsBuf` is the same shape plus the mandatory free-routine pair used by
//! `esmsgput`/`esballoc` to adopt a buffer the host already owns.

/// A caller-owned byte buffer plus how much of it is actually in use.
///
/// `maxlen` starts out equal to `buf.len()` but is tracked separately so a
/// caller can hand in a larger buffer than it wants filled — matching the
/// STREAMS `strbuf` convention this API is modeled on.
pub struct StrBuf<'a> {
    pub buf: &'a mut [u8],
    pub maxlen: usize,
    pub len: usize,
}

impl<'a> StrBuf<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        let maxlen = buf.len();
        Self {
            buf,
            maxlen,
            len: 0,
        }
    }

    pub fn filled(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}

/// Callback invoked exactly once, when the last reference to an
/// externally-adopted payload is released.
///
/// # Safety
/// `ptr` must be the same pointer passed to `esballoc`/`esmsgput`, valid
/// for `len` bytes, and must not be accessed by the caller after this
/// function returns.
pub type FreeFn = unsafe fn(ptr: *mut u8, len: usize, arg: *mut ());

/// An externally-owned buffer adopted by `esballoc`/`esmsgput`, plus the
/// free routine that reclaims it when the data block's reference count
/// reaches zero.
pub struct EsBuf {
    pub ptr: *mut u8,
    pub len: usize,
    pub free_fn: FreeFn,
    pub free_arg: *mut (),
}

impl EsBuf {
    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` bytes for as long
    /// as any message block may reference it, and `free_fn` must be safe
    /// to call exactly once with `(ptr, len, free_arg)`.
    pub unsafe fn new(ptr: *mut u8, len: usize, free_fn: FreeFn, free_arg: *mut ()) -> Self {
        Self {
            ptr,
            len,
            free_fn,
            free_arg,
        }
    }
}
