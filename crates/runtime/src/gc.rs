//! The copying collector
//!
//! A Cheney-style two-space copy. Roots are the context's value stack
//! slots `0..top`, both registers, and every pending inbox entry. Live
//! cells move to a fresh to-space; each moved from-space cell is
//! overwritten with a forwarding header so later references resolve to the
//! new address. The breadth-first scan then chases constructor arguments
//! and string-suffix roots.
//!
//! Cells outside the from-space — the shared nullary constructor table —
//! are left untouched.
//!
//! The to-space is sized from the heap's capacity target plus the pending
//! allocation that triggered the collection, so the caller's single retry
//! always finds room. The capacity target itself grows once the live set
//! crosses half of it.
//!
//! The retired from-space is not freed here but at the start of the *next*
//! collection: primitive operations read source bytes they fetched before
//! an allocation, and those reads must stay valid across the collection
//! the allocation may have triggered.
//!
//! The foreign-resource sweep runs last: entries not marked via a live
//! CDATA cell have their finalizer invoked exactly once and are dropped.

use tern_core::cell::{self, CHUNK_HEADER_SIZE, Cell, CellKind};
use tern_core::word::Word;

use crate::foreign::ForeignHeap;
use crate::heap::{Heap, align8};
use crate::vm::Vm;

/// A half-built to-space. Bump-only; the caller guarantees capacity.
struct ToSpace {
    base: *mut u8,
    next: *mut u8,
    size: usize,
}

impl ToSpace {
    fn new(size: usize) -> Self {
        let base = Heap::alloc_space(size);
        ToSpace {
            base,
            next: base,
            size,
        }
    }

    #[inline]
    fn used(&self) -> usize {
        self.next as usize - self.base as usize
    }

    /// Reserve `chunk` raw bytes. Capacity was computed from the from-space
    /// usage, so this cannot run out.
    #[inline]
    unsafe fn bump_raw(&mut self, chunk: usize) -> *mut u8 {
        debug_assert!(
            self.used() + chunk <= self.size,
            "to-space overflow: {} + {chunk} > {}",
            self.used(),
            self.size
        );
        let ptr = self.next;
        self.next = unsafe { self.next.add(chunk) };
        ptr
    }
}

struct Copier {
    from_lo: usize,
    from_hi: usize,
    to: ToSpace,
}

impl Copier {
    /// Move one value word, returning its post-collection form.
    unsafe fn copy(&mut self, w: Word) -> Word {
        if !w.is_cell() {
            return w;
        }
        let addr = w.bits() as usize;
        if addr < self.from_lo || addr >= self.from_hi {
            // Shared cells (the nullary table) never move.
            return w;
        }
        unsafe {
            let old = w.as_cell();
            if (*old).kind() == CellKind::Fwd {
                return Word::from_cell((*old).fwd());
            }

            let chunk_start = (old as *mut u8).sub(CHUNK_HEADER_SIZE);
            let chunk = (chunk_start as *const u64).read() as usize;
            let dst = self.to.bump_raw(chunk);
            std::ptr::copy_nonoverlapping(chunk_start, dst, chunk);
            let new = dst.add(CHUNK_HEADER_SIZE) as *mut Cell;

            // Interior pointers aim into the cell's own tail; rebase them
            // onto the moved block.
            match (*old).kind() {
                CellKind::Str => {
                    let data = (*old).str_data();
                    if !data.is_null() {
                        let offset = data as usize - old as usize;
                        (*new).set_str_data((new as *mut u8).add(offset));
                    }
                }
                CellKind::ManagedPtr => {
                    let offset = (*old).managed_data() as usize - old as usize;
                    let size = (*old).managed_size();
                    (*new).set_managed((new as *mut u8).add(offset), size);
                }
                _ => {}
            }

            (*old).set_fwd(new);
            Word::from_cell(new)
        }
    }
}

/// Collect the context's heap. `pending` is the chunk size whose failed
/// allocation triggered the collection (zero for explicit calls); the new
/// space is guaranteed to fit the live set plus that request.
///
/// # Safety
/// `vm` must point to a live context. In concurrent mode the caller must
/// hold the context's allocation lock (collection is only entered from
/// `allocate`, `require_alloc`, or an explicit safe point, all of which
/// do).
pub unsafe fn collect(vm: *mut Vm, pending: usize) {
    unsafe {
        let vm_ref = &mut *vm;
        vm_ref.heap.free_old();

        let used = vm_ref.heap.used();
        let floor = used + align8(pending) + CHUNK_HEADER_SIZE;
        let to_size = vm_ref.heap.next_size.max(align8(floor));

        let mut copier = Copier {
            from_lo: vm_ref.heap.base as usize,
            from_hi: vm_ref.heap.next as usize,
            to: ToSpace::new(to_size),
        };

        vm_ref.c_heap.clear_marks();

        // Roots: every stack slot below top, both registers, and any
        // messages waiting in the inbox.
        for slot in vm_ref.stack.live_mut() {
            *slot = copier.copy(*slot);
        }
        vm_ref.ret = copier.copy(vm_ref.ret);
        vm_ref.reg1 = copier.copy(vm_ref.reg1);
        #[cfg(feature = "threads")]
        {
            let mut inbox = vm_ref.inbox.lock();
            for entry in inbox.iter_mut() {
                entry.msg = copier.copy(entry.msg);
            }
        }

        // Breadth-first scan of everything copied so far.
        let mut scan = copier.to.base;
        while scan < copier.to.next {
            let chunk = (scan as *const u64).read() as usize;
            let cell = scan.add(CHUNK_HEADER_SIZE) as *mut Cell;
            match (*cell).kind() {
                CellKind::Con => {
                    let arity = (*cell).con_arity();
                    for i in 0..arity {
                        let moved = copier.copy(cell::con_arg(cell, i));
                        cell::con_set_arg(cell, i, moved);
                    }
                }
                CellKind::StrOffset => {
                    let root = copier.copy((*cell).str_off_root());
                    (*cell).set_str_off_root(root);
                }
                CellKind::CData => {
                    ForeignHeap::mark((*cell).opaque_ptr().cast());
                }
                _ => {}
            }
            scan = scan.add(chunk);
        }

        let live = copier.to.used();
        vm_ref.c_heap.sweep();

        let Copier { to, .. } = copier;
        vm_ref.heap.retire_to(to.base, to.next, to.size);
        vm_ref.heap.next_size = if live * 2 > to_size {
            to_size + vm_ref.heap.growth
        } else {
            to_size
        };
        vm_ref.stats.record_collection(live as u64);
    }
}

/// Explicit safe-point collection.
///
/// # Safety
/// `vm` must point to a live context owned by the calling thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_collect(vm: *mut Vm) {
    unsafe { collect(vm, 0) }
}
