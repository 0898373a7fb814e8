//! Execution contexts
//!
//! A context is the self-contained home of one logical execution: a value
//! stack, a return register and a scratch register, a moving heap, a
//! foreign-resource heap, and — in multi-context builds — an inbox with its
//! synchronisation primitives. A process runs either one implicit context
//! or many, each on its own OS thread; the `threads` feature picks at
//! build time.
//!
//! Contexts are handed around as raw pointers because generated code and
//! sibling contexts both need to name them. A context shell is never
//! freed: termination releases the stack, both heaps and the inbox, then
//! clears the `active` flag, so a late send can still read the flag and
//! fail gracefully instead of touching dead memory.
//!
//! ## Lock order
//!
//! allocation lock → inbox lock → inbox-block lock. Never the reverse.

use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "threads")]
use std::sync::atomic::AtomicU32;

#[cfg(feature = "threads")]
use parking_lot::{Condvar, Mutex, ReentrantMutex};

use tern_core::cell::{self, CellKind};
use tern_core::stack::ValueStack;
use tern_core::stats::{self, Stats, StatsSnapshot};
use tern_core::word::Word;

use crate::foreign::ForeignHeap;
use crate::heap::Heap;
#[cfg(feature = "threads")]
use crate::msg::{INBOX_INITIAL_CAPACITY, Msg};
use crate::nullary;
use crate::report;
use crate::signal;

/// Entry point of a compiled function run by `run` or a spawned context.
pub type EntryFn = unsafe extern "C" fn(*mut Vm);

/// Default sizes used by [`rts_init`] for the main context.
pub const DEFAULT_STACK_SLOTS: usize = 4_096_000;
pub const DEFAULT_HEAP_BYTES: usize = 4_096_000;

/// The reentrant allocation lock.
///
/// It serialises heap mutation between the owning thread and message
/// senders, and it must be reentrant because `require_alloc → allocate`
/// is a legitimate nesting. Acquire and release may happen in different
/// call frames (`require`/`done` spans the caller's allocation sequence),
/// so the RAII guard is forgotten on acquire and the mutex force-unlocked
/// on release.
#[cfg(feature = "threads")]
pub(crate) struct AllocLock {
    inner: ReentrantMutex<()>,
}

#[cfg(feature = "threads")]
impl AllocLock {
    fn new() -> Self {
        AllocLock {
            inner: ReentrantMutex::new(()),
        }
    }

    pub(crate) fn acquire(&self) {
        std::mem::forget(self.inner.lock());
    }

    pub(crate) fn release(&self) {
        // Paired with an acquire on this thread whose guard was forgotten.
        unsafe { self.inner.force_unlock() };
    }
}

/// One execution context.
pub struct Vm {
    pub stack: ValueStack,
    /// Return value of the most recently completed call.
    pub ret: Word,
    /// Scratch register.
    pub reg1: Word,
    pub heap: Heap,
    pub c_heap: ForeignHeap,
    pub stats: Stats,
    pub active: AtomicBool,
    #[cfg(feature = "threads")]
    pub(crate) inbox: Mutex<Vec<Msg>>,
    #[cfg(feature = "threads")]
    pub(crate) inbox_block: Mutex<()>,
    #[cfg(feature = "threads")]
    pub(crate) inbox_waiting: Condvar,
    #[cfg(feature = "threads")]
    pub(crate) alloc_lock: AllocLock,
    /// Number of participating sibling processes; allocation only locks
    /// once this is non-zero.
    #[cfg(feature = "threads")]
    pub(crate) processes: AtomicU32,
}

impl Vm {
    #[cfg(feature = "threads")]
    #[inline]
    pub(crate) fn concurrent(&self) -> bool {
        self.processes.load(Ordering::Relaxed) > 0
    }
}

/// Create a context with the given stack capacity (in value slots) and
/// heap capacity (in bytes). The context is leaked on purpose: its address
/// is its identity for the rest of the process.
pub fn init_vm(stack_slots: usize, heap_bytes: usize) -> *mut Vm {
    let vm = Box::new(Vm {
        stack: ValueStack::new(stack_slots),
        ret: Word::NULL,
        reg1: Word::NULL,
        heap: Heap::new(heap_bytes),
        c_heap: ForeignHeap::new(),
        stats: Stats::new(),
        active: AtomicBool::new(true),
        #[cfg(feature = "threads")]
        inbox: Mutex::new(Vec::with_capacity(INBOX_INITIAL_CAPACITY)),
        #[cfg(feature = "threads")]
        inbox_block: Mutex::new(()),
        #[cfg(feature = "threads")]
        inbox_waiting: Condvar::new(),
        #[cfg(feature = "threads")]
        alloc_lock: AllocLock::new(),
        #[cfg(feature = "threads")]
        processes: AtomicU32::new(0),
    });
    stats::CONTEXTS_SPAWNED.fetch_add(1, Ordering::Relaxed);
    Box::into_raw(vm)
}

/// Tear a context down: release the stack, the heap, the foreign heap
/// (firing all remaining finalizers) and the inbox, then mark the context
/// inactive. Returns the final statistics snapshot.
///
/// # Safety
/// `vm` must point to a live context no other thread is currently using.
pub unsafe fn terminate(vm: *mut Vm) -> StatsSnapshot {
    unsafe {
        let vm_ref = &mut *vm;
        #[cfg(feature = "threads")]
        {
            let mut inbox = vm_ref.inbox.lock();
            inbox.clear();
            inbox.shrink_to_fit();
        }
        vm_ref.stack.release();
        vm_ref.heap.release();
        vm_ref.c_heap.destroy();
        vm_ref.active.store(false, Ordering::SeqCst);
        stats::CONTEXTS_COMPLETED.fetch_add(1, Ordering::Relaxed);
        vm_ref.stats.snapshot()
    }
}

/// Terminate a context and emit the at-exit report if configured.
///
/// # Safety
/// See [`terminate`].
pub unsafe fn close_vm(vm: *mut Vm) -> StatsSnapshot {
    let snapshot = unsafe { terminate(vm) };
    report::emit(&snapshot);
    snapshot
}

#[cfg(feature = "threads")]
thread_local! {
    static CURRENT_VM: std::cell::Cell<*mut Vm> =
        const { std::cell::Cell::new(std::ptr::null_mut()) };
}

#[cfg(not(feature = "threads"))]
static GLOBAL_VM: std::sync::atomic::AtomicPtr<Vm> =
    std::sync::atomic::AtomicPtr::new(std::ptr::null_mut());

/// Associate a context with the calling OS thread (or, in single-context
/// builds, with the whole process).
pub fn bind_vm(vm: *mut Vm) {
    #[cfg(feature = "threads")]
    CURRENT_VM.with(|current| current.set(vm));
    #[cfg(not(feature = "threads"))]
    GLOBAL_VM.store(vm, Ordering::SeqCst);
}

/// The context bound to the calling OS thread; null before any binding.
pub fn current_vm() -> *mut Vm {
    #[cfg(feature = "threads")]
    {
        CURRENT_VM.with(|current| current.get())
    }
    #[cfg(not(feature = "threads"))]
    {
        GLOBAL_VM.load(Ordering::SeqCst)
    }
}

/// One-call startup for a generated `main`: shared constructor table,
/// signal policy, the main context, and the thread binding.
pub fn rts_init() -> *mut Vm {
    nullary::init_nullaries();
    signal::init_signals();
    let vm = init_vm(DEFAULT_STACK_SLOTS, DEFAULT_HEAP_BYTES);
    bind_vm(vm);
    vm
}

/// Run a compiled entry point against a context.
///
/// # Safety
/// `vm` must point to a live context; `entry` must be generated code
/// compiled against this runtime.
pub unsafe fn run(vm: *mut Vm, entry: EntryFn) {
    unsafe { entry(vm) }
}

// ---------------------------------------------------------------------------
// Debug dumps
// ---------------------------------------------------------------------------

/// Render one value to stderr, recursively for constructors.
///
/// # Safety
/// `w` must be null, immediate, or a pointer to a live cell.
pub unsafe fn dump_val(w: Word) {
    if w.is_null() {
        eprint!("null ");
        return;
    }
    if w.is_int() {
        eprint!("{} ", w.as_int());
        return;
    }
    unsafe {
        let cell = &*w.as_cell();
        match cell.kind() {
            CellKind::Con => {
                eprint!("{}[", cell.con_tag());
                for i in 0..cell.con_arity() {
                    dump_val(cell::con_arg(w.as_cell(), i));
                }
                eprint!("] ");
            }
            CellKind::Str => {
                let data = cell.str_data();
                if data.is_null() {
                    eprint!("STR[null] ");
                } else {
                    let bytes = std::ffi::CStr::from_ptr(data.cast()).to_bytes();
                    eprint!("STR[{}] ", String::from_utf8_lossy(bytes));
                }
            }
            CellKind::Float => eprint!("{} ", cell.float()),
            CellKind::Fwd => {
                eprint!("FWD ");
                dump_val(Word::from_cell(cell.fwd()));
            }
            kind => eprint!("{kind:?} "),
        }
    }
}

/// Render the whole value stack and the return register to stderr, marking
/// slots that point into the context's own heap.
///
/// # Safety
/// `vm` must point to a live context.
pub unsafe fn dump_stack(vm: *mut Vm) {
    unsafe {
        let vm_ref = &mut *vm;
        let top = vm_ref.stack.top;
        for i in 0..top {
            let w = vm_ref.stack.get(i);
            eprint!("{i}: ");
            dump_val(w);
            if vm_ref.heap.contains(w) {
                eprint!("OK");
            }
            eprintln!();
        }
        eprint!("RET: ");
        dump_val(vm_ref.ret);
        eprintln!();
    }
}

// ---------------------------------------------------------------------------
// C ABI
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn tern_rts_init() -> *mut Vm {
    rts_init()
}

#[unsafe(no_mangle)]
pub extern "C" fn tern_init_vm(stack_slots: usize, heap_bytes: usize) -> *mut Vm {
    init_vm(stack_slots, heap_bytes)
}

/// # Safety
/// See [`run`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_run(vm: *mut Vm, entry: EntryFn) {
    unsafe { run(vm, entry) }
}

/// # Safety
/// See [`terminate`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_close_vm(vm: *mut Vm) {
    unsafe {
        close_vm(vm);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn tern_current_vm() -> *mut Vm {
    current_vm()
}

#[unsafe(no_mangle)]
pub extern "C" fn tern_bind_vm(vm: *mut Vm) {
    bind_vm(vm)
}

/// # Safety
/// `vm` must point to a live context owned by the calling thread.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_push(vm: *mut Vm, value: Word) {
    unsafe { (*vm).stack.push(value) }
}

/// # Safety
/// `vm` must point to a live context with a non-empty stack.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_pop(vm: *mut Vm) -> Word {
    unsafe { (*vm).stack.pop() }
}

/// Read the slot `depth` entries below the top without popping.
///
/// # Safety
/// `vm` must point to a live context with more than `depth` stacked values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_top(vm: *mut Vm, depth: usize) -> Word {
    unsafe {
        let stack = &(*vm).stack;
        stack.get(stack.top - 1 - depth)
    }
}

/// # Safety
/// `vm` must point to a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_set_ret(vm: *mut Vm, value: Word) {
    unsafe { (*vm).ret = value }
}

/// # Safety
/// `vm` must point to a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_get_ret(vm: *mut Vm) -> Word {
    unsafe { (*vm).ret }
}

/// # Safety
/// `vm` must point to a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_stack_base(vm: *mut Vm) -> usize {
    unsafe { (*vm).stack.base }
}

/// # Safety
/// `vm` must point to a live context; `base` must not exceed `top`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_stack_set_base(vm: *mut Vm, base: usize) {
    unsafe { (*vm).stack.base = base }
}

/// # Safety
/// `vm` must point to a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_stack_top(vm: *mut Vm) -> usize {
    unsafe { (*vm).stack.top }
}

/// # Safety
/// `vm` must point to a live context; slots below `top` must hold values.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_stack_set_top(vm: *mut Vm, top: usize) {
    unsafe { (*vm).stack.top = top }
}

/// # Safety
/// See [`dump_val`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_dump_val(w: Word) {
    unsafe { dump_val(w) }
}

/// # Safety
/// See [`dump_stack`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_dump_stack(vm: *mut Vm) {
    unsafe { dump_stack(vm) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_init_and_terminate() {
        let vm = init_vm(32, 4096);
        unsafe {
            assert!((*vm).active.load(Ordering::SeqCst));
            (*vm).stack.push(Word::from_int(1));
            let snapshot = terminate(vm);
            assert!(!(*vm).active.load(Ordering::SeqCst));
            assert_eq!(snapshot.collections, 0);
        }
    }

    #[test]
    #[serial]
    fn test_bind_and_current() {
        let vm = init_vm(32, 4096);
        bind_vm(vm);
        assert_eq!(current_vm(), vm);
        bind_vm(std::ptr::null_mut());
        assert!(current_vm().is_null());
        unsafe { terminate(vm) };
    }

    #[test]
    fn test_stack_ffi_roundtrip() {
        let vm = init_vm(32, 4096);
        unsafe {
            tern_push(vm, Word::from_int(11));
            tern_push(vm, Word::from_int(22));
            assert_eq!(tern_top(vm, 0).as_int(), 22);
            assert_eq!(tern_top(vm, 1).as_int(), 11);
            assert_eq!(tern_pop(vm).as_int(), 22);
            tern_set_ret(vm, Word::from_int(7));
            assert_eq!(tern_get_ret(vm).as_int(), 7);
            terminate(vm);
        }
    }

    #[test]
    fn test_run_invokes_entry() {
        unsafe extern "C" fn entry(vm: *mut Vm) {
            unsafe { (*vm).ret = Word::from_int(99) };
        }
        let vm = init_vm(32, 4096);
        unsafe {
            run(vm, entry);
            assert_eq!((*vm).ret.as_int(), 99);
            terminate(vm);
        }
    }
}
