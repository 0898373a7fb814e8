//! Line input over C file handles
//!
//! Compiled code carries open files as raw `FILE*` pointers (PTR cells),
//! so line input works directly against the C stream API rather than Rust
//! readers.

use tern_core::word::Word;

use crate::strings::mk_str;
use crate::vm::Vm;

/// Read one line (newline included) from a C stream into a fresh string
/// cell. Empty input — end of file with nothing read — yields the empty
/// string.
///
/// # Safety
/// `vm` must point to a live context; `handle` must be an open readable
/// stream.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_read_str(vm: *mut Vm, handle: *mut libc::FILE) -> Word {
    let mut line: Vec<u8> = Vec::new();
    unsafe {
        loop {
            let c = libc::fgetc(handle);
            if c == libc::EOF {
                break;
            }
            line.push(c as u8);
            if c == b'\n' as i32 {
                break;
            }
        }
        let text = String::from_utf8_lossy(&line);
        mk_str(vm, &text, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strings::str_slice;
    use crate::vm::{close_vm, init_vm};
    use std::ffi::CString;
    use std::io::Write;

    fn fopen_read(path: &std::path::Path) -> *mut libc::FILE {
        let c_path = CString::new(path.to_str().unwrap()).unwrap();
        let mode = CString::new("r").unwrap();
        unsafe { libc::fopen(c_path.as_ptr(), mode.as_ptr()) }
    }

    #[test]
    fn test_read_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "first line\nsecond\n").unwrap();
        file.flush().unwrap();

        let vm = init_vm(32, 8192);
        unsafe {
            let handle = fopen_read(file.path());
            assert!(!handle.is_null());
            assert_eq!(str_slice(tern_read_str(vm, handle)), "first line\n");
            assert_eq!(str_slice(tern_read_str(vm, handle)), "second\n");
            // End of file reads as the empty string.
            assert_eq!(str_slice(tern_read_str(vm, handle)), "");
            libc::fclose(handle);
            close_vm(vm);
        }
    }

    #[test]
    fn test_read_empty_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let vm = init_vm(32, 8192);
        unsafe {
            let handle = fopen_read(file.path());
            assert_eq!(str_slice(tern_read_str(vm, handle)), "");
            libc::fclose(handle);
            close_vm(vm);
        }
    }
}
