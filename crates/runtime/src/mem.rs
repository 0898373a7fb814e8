//! Raw memory operations
//!
//! Pointer cells come in three shapes with distinct ownership: PTR carries
//! a raw address and owns nothing, MANAGEDPTR owns an inline copy of its
//! bytes, and CDATA (see `foreign`) delegates to the foreign heap. The
//! peek/poke family does direct, unchecked memory access against the
//! first two; offsets are in bytes and reads are unaligned-tolerant.
//!
//! `alloc`/`realloc` hand out heap-backed scratch blocks shaped as
//! RAWDATA cells; `free` is a no-op because collection reclaims them.

use std::ffi::c_void;

use tern_core::cell::{self, CELL_HEADER_SIZE, CellKind, managed_size, raw_data_size};
use tern_core::fatal::fatal;
use tern_core::word::Word;

use crate::heap::allocate;
use crate::num::mk_float;
use crate::vm::Vm;

/// The address a PTR or MANAGEDPTR cell points at.
///
/// # Safety
/// `w` must point to a live Ptr or ManagedPtr cell.
pub unsafe fn raw_ptr(w: Word) -> *mut u8 {
    unsafe {
        let cell = &*w.as_cell();
        match cell.kind() {
            CellKind::Ptr => cell.opaque_ptr(),
            CellKind::ManagedPtr => cell.managed_data(),
            kind => fatal("pointer", format_args!("not a pointer cell: {kind:?}")),
        }
    }
}

/// # Safety
/// `vm` must point to a live context; in concurrent mode the caller must
/// own it or hold its allocation lock (`outer_locked`).
pub unsafe fn mk_ptr(vm: *mut Vm, ptr: *mut c_void, outer_locked: bool) -> Word {
    unsafe {
        let cell = allocate(vm, CELL_HEADER_SIZE, outer_locked);
        (*cell).set_opaque(CellKind::Ptr, ptr.cast());
        Word::from_cell(cell)
    }
}

/// Allocate a MANAGEDPTR cell owning a copy of `size` bytes at `data`.
///
/// # Safety
/// As [`mk_ptr`]; `data` must be readable for `size` bytes.
pub unsafe fn mk_managed(vm: *mut Vm, data: *const u8, size: usize, outer_locked: bool) -> Word {
    unsafe {
        let cell = allocate(vm, managed_size(size), outer_locked);
        let inline = cell::payload_ptr(cell);
        std::ptr::copy_nonoverlapping(data, inline, size);
        (*cell).set_managed(inline, size);
        Word::from_cell(cell)
    }
}

/// # Safety
/// See [`mk_ptr`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_mk_ptr(vm: *mut Vm, ptr: *mut c_void) -> Word {
    unsafe { mk_ptr(vm, ptr, false) }
}

/// # Safety
/// See [`mk_managed`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_mk_mptr(vm: *mut Vm, data: *const u8, size: usize) -> Word {
    unsafe { mk_managed(vm, data, size, false) }
}

/// # Safety
/// See [`raw_ptr`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_get_ptr(w: Word) -> *mut c_void {
    unsafe { raw_ptr(w).cast() }
}

/// Heap-backed scratch allocation; returns the writable payload of a
/// fresh RAWDATA cell. The block moves with the heap, so the pointer must
/// not be held across a safe point.
///
/// # Safety
/// `vm` must point to a live context owned by the calling thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_alloc(vm: *mut Vm, size: usize) -> *mut c_void {
    unsafe {
        let cell = allocate(vm, raw_data_size(size), false);
        (*cell).set_raw_data(size);
        cell::payload_ptr(cell).cast()
    }
}

/// Grow a scratch block by allocating a fresh one and copying.
///
/// # Safety
/// As [`tern_alloc`]; `old` must be readable for `old_size` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_realloc(
    vm: *mut Vm,
    old: *const c_void,
    old_size: usize,
    size: usize,
) -> *mut c_void {
    unsafe {
        let fresh = tern_alloc(vm, size);
        std::ptr::copy_nonoverlapping(old.cast::<u8>(), fresh.cast::<u8>(), old_size.min(size));
        fresh
    }
}

/// Scratch blocks are reclaimed by collection, not by hand.
#[unsafe(no_mangle)]
pub extern "C" fn tern_free(ptr: *mut c_void, size: usize) {
    let _ = (ptr, size);
}

/// # Safety
/// `ptr + offset` must be readable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_peek(ptr: *const u8, offset: i64) -> u8 {
    unsafe { *ptr.offset(offset as isize) }
}

/// # Safety
/// `ptr + offset` must be writable.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_poke(ptr: *mut u8, offset: i64, value: u8) {
    unsafe { *ptr.offset(offset as isize) = value }
}

/// Read a pointer-sized value; the result is wrapped in a fresh PTR cell.
///
/// # Safety
/// `ptr` must be a pointer cell whose target is readable at the byte
/// offset for a whole pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_peek_ptr(vm: *mut Vm, ptr: Word, offset: Word) -> Word {
    unsafe {
        let addr = raw_ptr(ptr).offset(offset.as_int() as isize) as *const *mut c_void;
        mk_ptr(vm, addr.read_unaligned(), false)
    }
}

/// # Safety
/// `ptr` must be a pointer cell whose target is writable at the byte
/// offset for a whole pointer; `data` must be a pointer cell.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_poke_ptr(ptr: Word, offset: Word, data: Word) -> Word {
    unsafe {
        let addr = raw_ptr(ptr).offset(offset.as_int() as isize) as *mut *mut c_void;
        addr.write_unaligned(raw_ptr(data).cast());
        Word::from_int(0)
    }
}

/// # Safety
/// `ptr` must be a pointer cell whose target is readable at the byte
/// offset for four bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_peek_single(vm: *mut Vm, ptr: Word, offset: Word) -> Word {
    unsafe {
        let addr = raw_ptr(ptr).offset(offset.as_int() as isize) as *const f32;
        mk_float(vm, addr.read_unaligned() as f64, false)
    }
}

/// # Safety
/// `ptr` must be a pointer cell whose target is writable at the byte
/// offset for four bytes; `data` must be a Float cell.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_poke_single(ptr: Word, offset: Word, data: Word) -> Word {
    unsafe {
        let addr = raw_ptr(ptr).offset(offset.as_int() as isize) as *mut f32;
        addr.write_unaligned((*data.as_cell()).float() as f32);
        Word::from_int(0)
    }
}

/// # Safety
/// `ptr` must be a pointer cell whose target is readable at the byte
/// offset for eight bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_peek_double(vm: *mut Vm, ptr: Word, offset: Word) -> Word {
    unsafe {
        let addr = raw_ptr(ptr).offset(offset.as_int() as isize) as *const f64;
        mk_float(vm, addr.read_unaligned(), false)
    }
}

/// # Safety
/// `ptr` must be a pointer cell whose target is writable at the byte
/// offset for eight bytes; `data` must be a Float cell.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_poke_double(ptr: Word, offset: Word, data: Word) -> Word {
    unsafe {
        let addr = raw_ptr(ptr).offset(offset.as_int() as isize) as *mut f64;
        addr.write_unaligned((*data.as_cell()).float());
        Word::from_int(0)
    }
}

/// # Safety
/// `ptr + offset` must be writable for `size` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_memset(ptr: *mut c_void, offset: i64, value: u8, size: i64) {
    unsafe {
        libc::memset(
            ptr.cast::<u8>().offset(offset as isize).cast(),
            value as i32,
            size as usize,
        );
    }
}

/// # Safety
/// Source and destination ranges must be valid for `size` bytes; they may
/// overlap.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_memmove(
    dest: *mut c_void,
    src: *const c_void,
    dest_offset: i64,
    src_offset: i64,
    size: i64,
) {
    unsafe {
        libc::memmove(
            dest.cast::<u8>().offset(dest_offset as isize).cast(),
            src.cast::<u8>().offset(src_offset as isize).cast(),
            size as usize,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::{close_vm, init_vm};

    #[test]
    fn test_managed_owns_copy() {
        let vm = init_vm(32, 8192);
        unsafe {
            let mut source = [1u8, 2, 3, 4];
            let m = mk_managed(vm, source.as_ptr(), source.len(), false);
            source[0] = 99;
            let data = raw_ptr(m);
            assert_eq!(*data, 1, "managed cell keeps its own bytes");
            assert_eq!((*m.as_cell()).managed_size(), 4);
            close_vm(vm);
        }
    }

    #[test]
    fn test_peek_poke_bytes() {
        let vm = init_vm(32, 8192);
        unsafe {
            let zeros = [0u8; 8];
            let m = mk_managed(vm, zeros.as_ptr(), zeros.len(), false);
            tern_poke(raw_ptr(m), 3, 0xAB);
            assert_eq!(tern_peek(raw_ptr(m), 3), 0xAB);
            assert_eq!(tern_peek(raw_ptr(m), 0), 0);
            close_vm(vm);
        }
    }

    #[test]
    fn test_peek_poke_double() {
        let vm = init_vm(32, 8192);
        unsafe {
            let zeros = [0u8; 16];
            let m = mk_managed(vm, zeros.as_ptr(), zeros.len(), false);
            let f = crate::num::mk_float(vm, 6.25, false);
            tern_poke_double(m, Word::from_int(8), f);
            let read = tern_peek_double(vm, m, Word::from_int(8));
            assert_eq!((*read.as_cell()).float(), 6.25);
            close_vm(vm);
        }
    }

    #[test]
    fn test_alloc_and_realloc() {
        let vm = init_vm(32, 8192);
        unsafe {
            let block = tern_alloc(vm, 16).cast::<u8>();
            for i in 0..16u8 {
                *block.add(i as usize) = i;
            }
            let bigger = tern_realloc(vm, block.cast(), 16, 32).cast::<u8>();
            for i in 0..16u8 {
                assert_eq!(*bigger.add(i as usize), i);
            }
            tern_free(bigger.cast(), 32);
            close_vm(vm);
        }
    }

    #[test]
    fn test_memset_and_memmove() {
        let vm = init_vm(32, 8192);
        unsafe {
            let zeros = [0u8; 8];
            let m = mk_managed(vm, zeros.as_ptr(), zeros.len(), false);
            let data = raw_ptr(m);
            tern_memset(data.cast(), 0, 7, 4);
            assert_eq!(tern_peek(data, 3), 7);
            assert_eq!(tern_peek(data, 4), 0);
            tern_memmove(data.cast(), data.cast(), 4, 0, 4);
            assert_eq!(tern_peek(data, 7), 7);
            close_vm(vm);
        }
    }
}
