use std::borrow::Cow;
use std::ffi::{CStr, c_char};

/// Reads a NUL-terminated string coming from the native side.
///
/// Invalid UTF-8 is replaced rather than rejected: these strings feed
/// diagnostics and module names, never slot data.
///
/// # Safety
/// `c_buf` must be null or point to a NUL-terminated buffer that outlives `'a`.
pub(crate) unsafe fn read_cstring<'a>(c_buf: *const c_char) -> Option<Cow<'a, str>> {
    if c_buf.is_null() {
        return None;
    }
    let c_str: &CStr = unsafe { CStr::from_ptr(c_buf) };
    Some(c_str.to_string_lossy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    #[test]
    fn reads_and_replaces_invalid_utf8() {
        let text = CString::new("main").unwrap();
        assert_eq!(unsafe { read_cstring(text.as_ptr()) }.as_deref(), Some("main"));

        let bad = CString::new(vec![b'a', 0xff, b'b']).unwrap();
        assert_eq!(unsafe { read_cstring(bad.as_ptr()) }.as_deref(), Some("a\u{fffd}b"));

        assert!(unsafe { read_cstring(std::ptr::null()) }.is_none());
    }
}
