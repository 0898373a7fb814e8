//! The foreign-resource heap
//!
//! Cells can refer to memory the collector must not move: buffers handed
//! over by C libraries, file mappings, anything with its own teardown.
//! Each context keeps a side table of such entries; CDATA cells in the
//! moving heap point at entries by handle. Collection marks the entries
//! reachable through live CDATA cells and finalizes the rest — each
//! finalizer runs exactly once, in no particular order. Context
//! termination finalizes whatever is left.

use std::ffi::c_void;

use tern_core::cell::{CELL_HEADER_SIZE, CellKind};
use tern_core::word::Word;

use crate::heap::allocate;
use crate::vm::Vm;

/// Teardown hook invoked once when an entry becomes unreachable.
pub type Finalizer = unsafe extern "C" fn(*mut c_void);

/// One registered foreign resource.
#[repr(C)]
pub struct ForeignItem {
    pub data: *mut c_void,
    pub size: usize,
    pub finalizer: Option<Finalizer>,
    /// Set during collection when a live CDATA cell refers to this entry.
    marked: bool,
    /// Set once the entry has been inserted into a context's table.
    registered: bool,
}

/// Register an externally allocated region. The returned handle is owned
/// by whichever context's table it is inserted into; until then the caller
/// holds it.
pub fn create_item(data: *mut c_void, size: usize, finalizer: Option<Finalizer>) -> *mut ForeignItem {
    Box::into_raw(Box::new(ForeignItem {
        data,
        size,
        finalizer,
        marked: false,
        registered: false,
    }))
}

unsafe fn finalize_and_free(item: *mut ForeignItem) {
    unsafe {
        let boxed = Box::from_raw(item);
        if let Some(run) = boxed.finalizer {
            run(boxed.data);
        }
    }
}

/// A context's table of foreign resources.
pub struct ForeignHeap {
    items: Vec<*mut ForeignItem>,
}

impl ForeignHeap {
    pub fn new() -> Self {
        ForeignHeap { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Adopt a handle unless some table already owns it.
    ///
    /// # Safety
    /// `item` must come from [`create_item`] and not have been finalized.
    pub unsafe fn insert_if_needed(&mut self, item: *mut ForeignItem) {
        unsafe {
            if !(*item).registered {
                (*item).registered = true;
                self.items.push(item);
            }
        }
    }

    pub(crate) fn clear_marks(&mut self) {
        for &item in &self.items {
            unsafe { (*item).marked = false };
        }
    }

    /// # Safety
    /// `item` must be a live handle; called by the collector for each
    /// CDATA cell it copies.
    pub(crate) unsafe fn mark(item: *mut ForeignItem) {
        unsafe { (*item).marked = true };
    }

    /// Drop every unmarked entry, running its finalizer.
    pub(crate) fn sweep(&mut self) {
        self.items.retain(|&item| unsafe {
            if (*item).marked {
                true
            } else {
                finalize_and_free(item);
                false
            }
        });
    }

    /// Finalize everything that remains; used at context termination.
    pub fn destroy(&mut self) {
        for &item in &self.items {
            unsafe { finalize_and_free(item) };
        }
        self.items.clear();
    }
}

impl Default for ForeignHeap {
    fn default() -> Self {
        ForeignHeap::new()
    }
}

impl Drop for ForeignHeap {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Build a CDATA cell for `item`, adopting the handle into the context's
/// table if needed.
///
/// # Safety
/// `vm` must point to a live context; `item` must be a live handle.
pub unsafe fn mk_cdata(vm: *mut Vm, item: *mut ForeignItem, outer_locked: bool) -> Word {
    unsafe {
        (*vm).c_heap.insert_if_needed(item);
        let cell = allocate(vm, CELL_HEADER_SIZE, outer_locked);
        (*cell).set_opaque(CellKind::CData, item.cast());
        Word::from_cell(cell)
    }
}

/// Allocate `size` fresh bytes and register them with the given finalizer.
///
/// # Safety
/// `finalizer`, if present, must be callable with the allocated pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_cdata_allocate(
    size: usize,
    finalizer: Option<Finalizer>,
) -> *mut ForeignItem {
    let data = unsafe { libc::malloc(size) };
    create_item(data, size, finalizer)
}

/// Register an externally allocated region.
///
/// # Safety
/// `data` must stay valid until the finalizer runs.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_cdata_manage(
    data: *mut c_void,
    size: usize,
    finalizer: Option<Finalizer>,
) -> *mut ForeignItem {
    create_item(data, size, finalizer)
}

/// # Safety
/// See [`mk_cdata`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_mk_cdata(vm: *mut Vm, item: *mut ForeignItem) -> Word {
    unsafe { mk_cdata(vm, item, false) }
}
