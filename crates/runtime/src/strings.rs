//! String cells and operations
//!
//! A string cell keeps its NUL-terminated UTF-8 bytes inline, directly
//! after the header, so the collector can move the whole cell with one
//! block copy; the cell's data pointer aims into that inline region. The
//! NULL-source string has a null data pointer and is distinct from the
//! empty string; operations read it as empty.
//!
//! `str_tail` is the one operation with two representations: when a small
//! suffix cell fits without a collection it allocates a STROFFSET — a
//! (root string, byte offset) pair giving O(1) tail — and otherwise it
//! falls back to copying the suffix bytes. The fallback exists because
//! building the suffix cell could itself trigger a collection that moves
//! the root out from under it.
//!
//! Operations measure in codepoints; source bytes fetched before an
//! allocation stay readable across it because the retired semispace
//! outlives one collection.

use std::ffi::CStr;

use libc::c_char;

use tern_core::cell::{self, CELL_HEADER_SIZE, CellKind, str_size};
use tern_core::fatal::fatal;
use tern_core::word::Word;

use crate::heap::allocate;
use crate::utf8;
use crate::vm::Vm;

/// Byte size of a string-suffix cell; its payload fits in the header.
pub const STR_OFFSET_CELL_SIZE: usize = CELL_HEADER_SIZE;

/// Resolve a string value to its byte pointer. A STROFFSET reaches its
/// root string in one hop.
///
/// # Safety
/// `w` must point to a live Str or StrOffset cell.
pub unsafe fn str_ptr(w: Word) -> *const u8 {
    unsafe {
        let cell = &*w.as_cell();
        match cell.kind() {
            CellKind::Str => cell.str_data(),
            CellKind::StrOffset => {
                let root = &*cell.str_off_root().as_cell();
                root.str_data().add(cell.str_off_offset())
            }
            kind => fatal("string", format_args!("not a string cell: {kind:?}")),
        }
    }
}

/// View a string value as `&str`. A null data pointer reads as empty.
///
/// # Safety
/// `w` must point to a live Str or StrOffset cell whose bytes this
/// runtime wrote (they are valid UTF-8 by construction).
pub unsafe fn str_slice<'a>(w: Word) -> &'a str {
    unsafe {
        let ptr = str_ptr(w);
        if ptr.is_null() {
            return "";
        }
        let bytes = CStr::from_ptr(ptr.cast::<c_char>()).to_bytes();
        std::str::from_utf8_unchecked(bytes)
    }
}

/// Allocate a string cell holding a copy of `s`.
///
/// # Safety
/// `vm` must point to a live context; in concurrent mode the caller must
/// own it or hold its allocation lock (`outer_locked`).
pub unsafe fn mk_str(vm: *mut Vm, s: &str, outer_locked: bool) -> Word {
    unsafe {
        let cell = allocate(vm, str_size(s.len() + 1), outer_locked);
        let data = cell::payload_ptr(cell);
        std::ptr::copy_nonoverlapping(s.as_ptr(), data, s.len());
        *data.add(s.len()) = 0;
        (*cell).set_str_data(data);
        Word::from_cell(cell)
    }
}

/// Build a string cell from a C string; a NULL source yields the cell
/// with a null data pointer.
///
/// # Safety
/// `s` must be null or NUL-terminated UTF-8; see [`mk_str`] for `vm`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_mk_str(vm: *mut Vm, s: *const c_char) -> Word {
    unsafe {
        if s.is_null() {
            let cell = allocate(vm, CELL_HEADER_SIZE, false);
            (*cell).set_str_data(std::ptr::null());
            return Word::from_cell(cell);
        }
        let bytes = CStr::from_ptr(s).to_bytes();
        mk_str(vm, std::str::from_utf8_unchecked(bytes), false)
    }
}

/// The raw byte pointer of a string value (null for the NULL string).
///
/// # Safety
/// `w` must point to a live Str or StrOffset cell. The pointer is only
/// valid until the next safe point.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_get_str(w: Word) -> *const c_char {
    unsafe { str_ptr(w).cast() }
}

/// Concatenate two strings into a fresh cell.
///
/// # Safety
/// `vm` must point to a live context; `l` and `r` must be string values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_concat(vm: *mut Vm, l: Word, r: Word) -> Word {
    unsafe {
        let ls = str_slice(l);
        let rs = str_slice(r);
        // The allocation may collect and move l/r; ls/rs keep reading the
        // retired space.
        let cell = allocate(vm, str_size(ls.len() + rs.len() + 1), false);
        let data = cell::payload_ptr(cell);
        std::ptr::copy_nonoverlapping(ls.as_ptr(), data, ls.len());
        std::ptr::copy_nonoverlapping(rs.as_ptr(), data.add(ls.len()), rs.len());
        *data.add(ls.len() + rs.len()) = 0;
        (*cell).set_str_data(data);
        Word::from_cell(cell)
    }
}

/// The leading codepoint as an immediate integer.
///
/// # Safety
/// `vm` must point to a live context; `s` must be a non-empty string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_str_head(vm: *mut Vm, s: Word) -> Word {
    unsafe { tern_str_index(vm, s, Word::from_int(0)) }
}

/// Everything after the first codepoint.
///
/// Prefers the O(1) suffix cell; falls back to a byte copy when the
/// suffix cell would not fit without a collection.
///
/// # Safety
/// `vm` must point to a live context; `s` must be a non-empty string.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_str_tail(vm: *mut Vm, s: Word) -> Word {
    unsafe {
        if (*vm).heap.space(STR_OFFSET_CELL_SIZE) {
            let first = utf8::char_len(str_slice(s));
            let cell_ref = &*s.as_cell();
            let (root, base_offset) = match cell_ref.kind() {
                CellKind::StrOffset => (cell_ref.str_off_root(), cell_ref.str_off_offset()),
                _ => (s, 0),
            };
            let cell = allocate(vm, STR_OFFSET_CELL_SIZE, false);
            (*cell).set_str_offset(root, base_offset + first);
            Word::from_cell(cell)
        } else {
            let rest = utf8::advance(str_slice(s), 1);
            mk_str(vm, rest, false)
        }
    }
}

/// Prepend a codepoint to a string.
///
/// # Safety
/// `vm` must point to a live context; `c` must be an immediate codepoint
/// and `s` a string value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_str_cons(vm: *mut Vm, c: Word, s: Word) -> Word {
    unsafe {
        let ch = char::from_u32(c.as_int() as u32).unwrap_or(char::REPLACEMENT_CHARACTER);
        let mut buf = [0u8; 4];
        let head = ch.encode_utf8(&mut buf);
        let rest = str_slice(s);
        let cell = allocate(vm, str_size(head.len() + rest.len() + 1), false);
        let data = cell::payload_ptr(cell);
        std::ptr::copy_nonoverlapping(head.as_ptr(), data, head.len());
        std::ptr::copy_nonoverlapping(rest.as_ptr(), data.add(head.len()), rest.len());
        *data.add(head.len() + rest.len()) = 0;
        (*cell).set_str_data(data);
        Word::from_cell(cell)
    }
}

/// The codepoint at index `i` as an immediate integer.
///
/// # Safety
/// `vm` must point to a live context; `s` must be a string value with
/// more than `i` codepoints.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_str_index(vm: *mut Vm, s: Word, i: Word) -> Word {
    let _ = vm;
    unsafe {
        let idx = i.as_int() as usize;
        let text = str_slice(s);
        debug_assert!(
            utf8::strlen(text) > idx,
            "str_index: index {idx} out of range"
        );
        let cp = utf8::codepoint_at(text, idx).unwrap_or('\0');
        Word::from_int(cp as i64)
    }
}

/// Copy `length` codepoints starting at codepoint `offset` into a fresh
/// string cell.
///
/// # Safety
/// `vm` must point to a live context; `s` must be a string value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_substr(vm: *mut Vm, offset: Word, length: Word, s: Word) -> Word {
    unsafe {
        let start = utf8::advance(str_slice(s), offset.as_int() as usize);
        let taken = utf8::prefix(start, length.as_int() as usize);
        mk_str(vm, taken, false)
    }
}

/// The string with its codepoints reversed.
///
/// # Safety
/// `vm` must point to a live context; `s` must be a string value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_str_rev(vm: *mut Vm, s: Word) -> Word {
    unsafe {
        let reversed = utf8::reversed(str_slice(s));
        mk_str(vm, &reversed, false)
    }
}

/// Codepoint count as an immediate integer.
///
/// # Safety
/// `vm` must point to a live context; `s` must be a string value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_str_len(vm: *mut Vm, s: Word) -> Word {
    let _ = vm;
    unsafe { Word::from_int(utf8::strlen(str_slice(s)) as i64) }
}

/// Byte-wise equality, as immediate 0 or 1.
///
/// # Safety
/// `l` and `r` must be string values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_str_eq(vm: *mut Vm, l: Word, r: Word) -> Word {
    let _ = vm;
    unsafe { Word::from_int((str_slice(l) == str_slice(r)) as i64) }
}

/// Byte-wise less-than, as immediate 0 or 1.
///
/// # Safety
/// `l` and `r` must be string values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_str_lt(vm: *mut Vm, l: Word, r: Word) -> Word {
    let _ = vm;
    unsafe { Word::from_int((str_slice(l) < str_slice(r)) as i64) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{close_vm, init_vm};

    #[test]
    fn test_mk_str_inline_bytes() {
        let vm = init_vm(32, 8192);
        unsafe {
            let s = mk_str(vm, "hello", false);
            let cell = &*s.as_cell();
            assert_eq!(cell.kind(), CellKind::Str);
            // Data pointer aims just past the header of its own cell.
            assert_eq!(
                cell.str_data() as usize,
                s.as_cell() as usize + CELL_HEADER_SIZE
            );
            assert_eq!(str_slice(s), "hello");
            close_vm(vm);
        }
    }

    #[test]
    fn test_null_source_is_not_empty() {
        let vm = init_vm(32, 8192);
        unsafe {
            let null_str = tern_mk_str(vm, std::ptr::null());
            let empty = mk_str(vm, "", false);
            assert!(tern_get_str(null_str).is_null());
            assert!(!tern_get_str(empty).is_null());
            assert_eq!(str_slice(null_str), "");
            assert_eq!(str_slice(empty), "");
            close_vm(vm);
        }
    }

    #[test]
    fn test_concat_codepoint_lengths() {
        let vm = init_vm(32, 8192);
        unsafe {
            let a = mk_str(vm, "hé", false);
            let b = mk_str(vm, "llo", false);
            let joined = tern_concat(vm, a, b);
            assert_eq!(str_slice(joined), "héllo");
            assert_eq!(tern_str_len(vm, joined).as_int(), 5);
            close_vm(vm);
        }
    }

    #[test]
    fn test_head_index_substr() {
        let vm = init_vm(32, 8192);
        unsafe {
            let s = mk_str(vm, "héllo", false);
            assert_eq!(tern_str_head(vm, s).as_int(), 'h' as i64);
            assert_eq!(tern_str_index(vm, s, Word::from_int(1)).as_int(), 0xE9);
            let mid = tern_substr(vm, Word::from_int(1), Word::from_int(3), s);
            assert_eq!(str_slice(mid), "éll");
            close_vm(vm);
        }
    }

    #[test]
    fn test_substr_of_whole_string_is_identity() {
        let vm = init_vm(32, 8192);
        unsafe {
            let s = mk_str(vm, "héllo", false);
            let len = tern_str_len(vm, s);
            let copy = tern_substr(vm, Word::from_int(0), len, s);
            assert_eq!(str_slice(copy), str_slice(s));
            close_vm(vm);
        }
    }

    #[test]
    fn test_tail_uses_offset_cell_with_room() {
        let vm = init_vm(32, 8192);
        unsafe {
            let s = mk_str(vm, "ab", false);
            let tail = tern_str_tail(vm, s);
            assert_eq!((*tail.as_cell()).kind(), CellKind::StrOffset);
            assert_eq!(str_slice(tail), "b");
            close_vm(vm);
        }
    }

    #[test]
    fn test_tail_of_tail_shares_one_root() {
        let vm = init_vm(32, 8192);
        unsafe {
            let s = mk_str(vm, "abc", false);
            let t1 = tern_str_tail(vm, s);
            let t2 = tern_str_tail(vm, t1);
            assert_eq!(str_slice(t2), "c");
            // The second suffix points straight at the root string.
            assert_eq!((*t2.as_cell()).str_off_root().bits(), s.bits());
            close_vm(vm);
        }
    }

    #[test]
    fn test_tail_copies_when_heap_is_full() {
        use crate::heap::align8;
        use tern_core::cell::CHUNK_HEADER_SIZE;

        let vm = init_vm(256, 2048);
        unsafe {
            let s = mk_str(vm, "ab", false);
            (*vm).stack.push(s);
            // One live block sized to leave no room for a suffix cell.
            let remaining = (*vm).heap.end as usize - (*vm).heap.next as usize;
            let filler_size = align8(remaining - 40);
            let filler = allocate(vm, filler_size, false);
            (*filler).set_raw_data(filler_size - CELL_HEADER_SIZE);
            (*vm).stack.push(Word::from_cell(filler));
            assert!(!(*vm).heap.space(STR_OFFSET_CELL_SIZE));

            let s = (*vm).stack.get(0);
            let tail = tern_str_tail(vm, s);
            assert_eq!((*tail.as_cell()).kind(), CellKind::Str);
            assert_eq!(str_slice(tail), "b");
            close_vm(vm);
        }
    }

    #[test]
    fn test_cons_then_tail_roundtrip() {
        let vm = init_vm(32, 8192);
        unsafe {
            let s = mk_str(vm, "éllo", false);
            let consed = tern_str_cons(vm, Word::from_int('h' as i64), s);
            assert_eq!(str_slice(consed), "héllo");
            let back = tern_str_tail(vm, consed);
            assert_eq!(str_slice(back), "éllo");
            close_vm(vm);
        }
    }

    #[test]
    fn test_rev_and_compare() {
        let vm = init_vm(32, 8192);
        unsafe {
            let s = mk_str(vm, "héllo", false);
            let rev = tern_str_rev(vm, s);
            assert_eq!(str_slice(rev), "olléh");

            let a = mk_str(vm, "apple", false);
            let b = mk_str(vm, "banana", false);
            assert_eq!(tern_str_eq(vm, a, a).as_int(), 1);
            assert_eq!(tern_str_eq(vm, a, b).as_int(), 0);
            assert_eq!(tern_str_lt(vm, a, b).as_int(), 1);
            assert_eq!(tern_str_lt(vm, b, a).as_int(), 0);
            close_vm(vm);
        }
    }
}
