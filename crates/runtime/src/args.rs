//! Command-line argument capture
//!
//! The driver captures `argc`/`argv` exactly once at startup; compiled
//! code then queries by index. The stored strings live for the whole
//! process, so the pointers handed back stay valid.

use std::ffi::{CStr, CString, c_char};
use std::sync::OnceLock;

static ARGS: OnceLock<Vec<CString>> = OnceLock::new();

/// Capture the program arguments. Called once from the generated `main`
/// before any compiled code runs; later calls are ignored.
///
/// # Safety
/// `argv` must hold `argc` valid, NUL-terminated strings.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_args_init(argc: i32, argv: *const *const c_char) {
    let args: Vec<CString> = (0..argc)
        .map(|i| unsafe {
            let ptr = *argv.offset(i as isize);
            if ptr.is_null() {
                CString::default()
            } else {
                CStr::from_ptr(ptr).to_owned()
            }
        })
        .collect();
    let _ = ARGS.set(args);
}

/// Number of captured arguments, program name included.
#[unsafe(no_mangle)]
pub extern "C" fn tern_num_args() -> i64 {
    ARGS.get().map_or(0, Vec::len) as i64
}

/// The argument at `index`, or null when out of range.
#[unsafe(no_mangle)]
pub extern "C" fn tern_get_arg(index: i64) -> *const c_char {
    if index < 0 {
        return std::ptr::null();
    }
    ARGS.get()
        .and_then(|args| args.get(index as usize))
        .map_or(std::ptr::null(), |arg| arg.as_ptr())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_capture_and_query() {
        let held: Vec<CString> = ["prog", "alpha", "beta"]
            .iter()
            .map(|s| CString::new(*s).unwrap())
            .collect();
        let ptrs: Vec<*const c_char> = held.iter().map(|s| s.as_ptr()).collect();
        unsafe { tern_args_init(ptrs.len() as i32, ptrs.as_ptr()) };

        assert_eq!(tern_num_args(), 3);
        let first = unsafe { CStr::from_ptr(tern_get_arg(1)) };
        assert_eq!(first.to_str().unwrap(), "alpha");
        assert!(tern_get_arg(99).is_null());
        assert!(tern_get_arg(-1).is_null());

        // A second capture is a no-op.
        unsafe { tern_args_init(0, std::ptr::null()) };
        assert_eq!(tern_num_args(), 3);
    }
}
