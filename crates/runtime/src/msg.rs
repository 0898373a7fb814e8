//! Message passing between contexts
//!
//! Contexts never share heaps: a message is a structural deep copy of the
//! value into the destination's heap, performed by the *sender* while it
//! holds the destination's reentrant allocation lock.
//!
//! ## The send protocol
//!
//! 1. An inactive destination fails the send (`false`) without copying.
//! 2. The sender records the destination's collection count, takes the
//!    allocation lock, copies, and releases.
//! 3. If the count advanced during the copy, a collection on the
//!    destination has invalidated the copied references: the result is
//!    discarded and the copy runs once more — the collection that just
//!    happened guarantees room this time.
//! 4. The entry is appended to the inbox, and the inbox condition
//!    variable is signalled under its own mutex.
//!
//! Lock order everywhere: allocation lock → inbox lock → inbox-block
//! lock. The receive path takes the inbox lock *or* the inbox-block lock,
//! never one inside the other; a message that lands between its inbox
//! probe and its wait is picked up by the 3-second poll.
//!
//! ## Ordering
//!
//! The inbox is append-only until drained and `recv` closes the gap by an
//! order-preserving slide, so messages from one sender arrive in send
//! order. Nothing is promised across senders. The inbox starts at 1024
//! entries and grows when full.

use std::time::Duration;

use tern_core::cell::{self, CELL_HEADER_SIZE, CellKind, con_size, raw_data_size};
use tern_core::fatal::fatal;
use tern_core::stats::{MESSAGES_RECEIVED, MESSAGES_SENT};
use tern_core::word::Word;

use std::sync::atomic::Ordering;

use crate::heap::allocate;
use crate::mem::mk_managed;
use crate::num::{mk_bits, mk_float};
use crate::nullary::nullary;
use crate::strings::{mk_str, str_slice};
use crate::vm::{EntryFn, Vm, bind_vm, init_vm, terminate};

pub(crate) const INBOX_INITIAL_CAPACITY: usize = 1024;

/// One delivered message: who sent it and the copied value.
pub struct Msg {
    pub sender: *mut Vm,
    pub msg: Word,
}

// ---------------------------------------------------------------------------
// Deep copy
// ---------------------------------------------------------------------------

/// Structurally clone `value` into `dest`'s heap. The caller holds the
/// destination's allocation lock, so every allocation passes
/// `outer_locked`.
///
/// # Safety
/// `dest` must point to a live context whose allocation lock the calling
/// thread holds; `value` must be a value of the sender's heap.
pub unsafe fn copy_value(dest: *mut Vm, value: Word) -> Word {
    if !value.is_cell() {
        return value;
    }
    unsafe {
        let src = value.as_cell();
        match (*src).kind() {
            CellKind::Con => {
                let tag = (*src).con_tag();
                let arity = (*src).con_arity();
                if arity == 0 && tag < 256 {
                    // Shared pre-allocated constructor; alias, don't copy.
                    return nullary(tag as u8);
                }
                let copy = allocate(dest, con_size(arity), true);
                (*copy).set_con(tag, arity);
                for i in 0..arity {
                    let arg = copy_value(dest, cell::con_arg(src, i));
                    cell::con_set_arg(copy, i, arg);
                }
                Word::from_cell(copy)
            }
            CellKind::Float => mk_float(dest, (*src).float(), true),
            CellKind::Str => {
                if (*src).str_data().is_null() {
                    let copy = allocate(dest, CELL_HEADER_SIZE, true);
                    (*copy).set_str_data(std::ptr::null());
                    Word::from_cell(copy)
                } else {
                    mk_str(dest, str_slice(value), true)
                }
            }
            // A suffix must not keep a back-pointer into the sender's
            // heap; flatten it into a whole string.
            CellKind::StrOffset => mk_str(dest, str_slice(value), true),
            // The bignum arena is process-global; the payload aliases.
            CellKind::BigInt => {
                let copy = allocate(dest, CELL_HEADER_SIZE, true);
                (*copy).set_opaque(CellKind::BigInt, (*src).opaque_ptr());
                Word::from_cell(copy)
            }
            // The raw address is copied verbatim; the sender is
            // responsible for the pointee being safely shared.
            CellKind::Ptr => {
                let copy = allocate(dest, CELL_HEADER_SIZE, true);
                (*copy).set_opaque(CellKind::Ptr, (*src).opaque_ptr());
                Word::from_cell(copy)
            }
            CellKind::ManagedPtr => {
                mk_managed(dest, (*src).managed_data(), (*src).managed_size(), true)
            }
            CellKind::Bits8 | CellKind::Bits16 | CellKind::Bits32 | CellKind::Bits64 => {
                mk_bits(dest, (*src).kind(), (*src).bits_value(), true)
            }
            CellKind::RawData => {
                let len = (*src).raw_data_len();
                let copy = allocate(dest, raw_data_size(len), true);
                (*copy).set_raw_data(len);
                std::ptr::copy_nonoverlapping(
                    cell::payload_ptr(src),
                    cell::payload_ptr(copy),
                    len,
                );
                Word::from_cell(copy)
            }
            CellKind::CData => fatal(
                "send",
                "foreign data cannot cross contexts (its finalizer would run twice)",
            ),
            kind => fatal("send", format_args!("unexpected cell kind in message: {kind:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Spawn
// ---------------------------------------------------------------------------

struct ThreadData {
    vm: *mut Vm,
    parent: *mut Vm,
    entry: EntryFn,
    arg: Word,
}

// Safety: the child context is owned by the new thread from the moment it
// starts; the parent pointer is only touched through its atomic process
// counter, and the argument word was already copied into the child's heap.
unsafe impl Send for ThreadData {}

fn run_child(data: ThreadData) {
    unsafe {
        bind_vm(data.vm);
        (*data.vm).stack.push(data.arg);
        (data.entry)(data.vm);
        (*data.parent).processes.fetch_sub(1, Ordering::SeqCst);
        terminate(data.vm);
    }
}

/// Start a sibling context running `entry` with `arg` (deep-copied) as
/// the only stacked value. The child mirrors the parent's stack and heap
/// sizes, terminates itself when `entry` returns, and is not joinable —
/// coordinate through messages instead.
///
/// # Safety
/// `parent` must point to a live context; `entry` must be generated code
/// compiled against this runtime; `arg` must be a value of the parent's
/// heap.
pub unsafe fn spawn(parent: *mut Vm, entry: EntryFn, arg: Word) -> *mut Vm {
    unsafe {
        let parent_ref = &*parent;
        let child = init_vm(parent_ref.stack.capacity(), parent_ref.heap.size());
        // The child can send and receive from birth.
        (*child).processes.store(1, Ordering::SeqCst);
        let arg_copy = copy_value(child, arg);
        parent_ref.processes.fetch_add(1, Ordering::SeqCst);

        let data = ThreadData {
            vm: child,
            parent,
            entry,
            arg: arg_copy,
        };
        let spawned = std::thread::Builder::new()
            .name("tern-context".to_string())
            .spawn(move || run_child(data));
        if let Err(err) = spawned {
            fatal("spawn", format_args!("cannot start context thread: {err}"));
        }
        child
    }
}

// ---------------------------------------------------------------------------
// Send / peek / receive
// ---------------------------------------------------------------------------

/// Deliver a deep copy of `value` to `dest`'s inbox. Returns false when
/// the destination has terminated.
///
/// # Safety
/// `sender` and `dest` must point to contexts; `value` must be a value of
/// the sender's heap.
pub unsafe fn send_message(sender: *mut Vm, dest: *mut Vm, value: Word) -> bool {
    unsafe {
        let dest_ref = &*dest;
        if !dest_ref.active.load(Ordering::SeqCst) {
            return false;
        }

        let collections_before = dest_ref.stats.collections();
        dest_ref.alloc_lock.acquire();
        let mut copied = copy_value(dest, value);
        dest_ref.alloc_lock.release();

        if dest_ref.stats.collections() > collections_before {
            // A collection invalidated the copy; there is room now.
            dest_ref.alloc_lock.acquire();
            copied = copy_value(dest, value);
            dest_ref.alloc_lock.release();
        }

        {
            let mut inbox = dest_ref.inbox.lock();
            inbox.push(Msg {
                sender,
                msg: copied,
            });
            // Wake the receiver before the inbox lock is dropped.
            let _block = dest_ref.inbox_block.lock();
            dest_ref.inbox_waiting.notify_one();
        }
        MESSAGES_SENT.fetch_add(1, Ordering::Relaxed);
        true
    }
}

/// Non-blocking probe: the sender of the earliest inbox entry matching
/// the filter (null = any), or null when nothing matches.
///
/// # Safety
/// `vm` must point to a live context.
pub unsafe fn check_messages_from(vm: *mut Vm, sender: *mut Vm) -> *mut Vm {
    unsafe {
        let inbox = (*vm).inbox.lock();
        inbox
            .iter()
            .find(|entry| sender.is_null() || entry.sender == sender)
            .map_or(std::ptr::null_mut(), |entry| entry.sender)
    }
}

/// Probe with a wall-clock timeout: waits up to `delay_secs` for any
/// message to arrive.
///
/// # Safety
/// `vm` must point to a live context owned by the calling thread.
pub unsafe fn check_messages_timeout(vm: *mut Vm, delay_secs: i64) -> *mut Vm {
    unsafe {
        let found = check_messages_from(vm, std::ptr::null_mut());
        if !found.is_null() {
            return found;
        }
        let vm_ref = &*vm;
        {
            let mut block = vm_ref.inbox_block.lock();
            let _ = vm_ref
                .inbox_waiting
                .wait_for(&mut block, Duration::from_secs(delay_secs.max(0) as u64));
        }
        check_messages_from(vm, std::ptr::null_mut())
    }
}

/// Block until a message matching the filter (null = any) arrives, remove
/// it from the inbox preserving the order of the rest, and hand it to the
/// caller. The caller owns the returned box (`free_msg`) and must root
/// the payload before the next safe point.
///
/// # Safety
/// `vm` must point to a live context owned by the calling thread.
pub unsafe fn recv_message_from(vm: *mut Vm, sender: *mut Vm) -> *mut Msg {
    unsafe {
        let vm_ref = &*vm;
        loop {
            {
                let mut inbox = vm_ref.inbox.lock();
                if let Some(i) = inbox
                    .iter()
                    .position(|entry| sender.is_null() || entry.sender == sender)
                {
                    // Order-preserving gap close; inboxes are short.
                    let entry = inbox.remove(i);
                    drop(inbox);
                    MESSAGES_RECEIVED.fetch_add(1, Ordering::Relaxed);
                    return Box::into_raw(Box::new(entry));
                }
            }
            // Poll-with-condvar: a signal sent between the probe above and
            // this wait is recovered after at most one poll interval.
            let mut block = vm_ref.inbox_block.lock();
            let _ = vm_ref
                .inbox_waiting
                .wait_for(&mut block, Duration::from_secs(3));
        }
    }
}

// ---------------------------------------------------------------------------
// C ABI
// ---------------------------------------------------------------------------

/// # Safety
/// See [`spawn`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_spawn(parent: *mut Vm, entry: EntryFn, arg: Word) -> *mut Vm {
    unsafe { spawn(parent, entry, arg) }
}

/// # Safety
/// See [`send_message`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_send_message(sender: *mut Vm, dest: *mut Vm, value: Word) -> bool {
    unsafe { send_message(sender, dest, value) }
}

/// # Safety
/// See [`check_messages_from`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_check_messages(vm: *mut Vm) -> *mut Vm {
    unsafe { check_messages_from(vm, std::ptr::null_mut()) }
}

/// # Safety
/// See [`check_messages_from`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_check_messages_from(vm: *mut Vm, sender: *mut Vm) -> *mut Vm {
    unsafe { check_messages_from(vm, sender) }
}

/// # Safety
/// See [`check_messages_timeout`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_check_messages_timeout(vm: *mut Vm, delay_secs: i64) -> *mut Vm {
    unsafe { check_messages_timeout(vm, delay_secs) }
}

/// # Safety
/// See [`recv_message_from`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_recv_message(vm: *mut Vm) -> *mut Msg {
    unsafe { recv_message_from(vm, std::ptr::null_mut()) }
}

/// # Safety
/// See [`recv_message_from`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_recv_message_from(vm: *mut Vm, sender: *mut Vm) -> *mut Msg {
    unsafe { recv_message_from(vm, sender) }
}

/// # Safety
/// `msg` must come from a receive and not have been freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_get_msg(msg: *mut Msg) -> Word {
    unsafe { (*msg).msg }
}

/// # Safety
/// `msg` must come from a receive and not have been freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_get_sender(msg: *mut Msg) -> *mut Vm {
    unsafe { (*msg).sender }
}

/// # Safety
/// `msg` must come from a receive; it must not be used afterwards.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_free_msg(msg: *mut Msg) {
    unsafe {
        drop(Box::from_raw(msg));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::con::mk_con;
    use crate::num::tern_mk_bits32;
    use crate::vm::close_vm;

    #[test]
    fn test_send_copies_into_destination_heap() {
        crate::nullary::init_nullaries();
        let a = init_vm(64, 16384);
        let b = init_vm(64, 16384);
        unsafe {
            let payload = mk_con(
                a,
                3,
                &[mk_str(a, "x", false), tern_mk_bits32(a, 0xDEAD_BEEF)],
            );
            assert!(send_message(a, b, payload));

            let msg = recv_message_from(b, std::ptr::null_mut());
            let copied = tern_get_msg(msg);
            assert_eq!(tern_get_sender(msg), a);
            tern_free_msg(msg);

            // Deep-equal, and every cell lives in b's heap.
            assert!((*b).heap.contains(copied));
            assert_eq!((*copied.as_cell()).con_tag(), 3);
            let s = cell::con_arg(copied.as_cell(), 0);
            let bits = cell::con_arg(copied.as_cell(), 1);
            assert!((*b).heap.contains(s));
            assert!((*b).heap.contains(bits));
            assert_eq!(str_slice(s), "x");
            assert_eq!((*bits.as_cell()).bits_value(), 0xDEAD_BEEF);
            assert_ne!(copied.bits(), payload.bits(), "no shared storage");

            close_vm(a);
            close_vm(b);
        }
    }

    #[test]
    fn test_send_to_inactive_context_fails() {
        let a = init_vm(64, 8192);
        let b = init_vm(64, 8192);
        unsafe {
            terminate(b);
            assert!(!send_message(a, b, Word::from_int(1)));
            close_vm(a);
        }
    }

    #[test]
    fn test_per_sender_fifo() {
        let a = init_vm(64, 8192);
        let b = init_vm(64, 8192);
        unsafe {
            assert!(send_message(a, b, Word::from_int(1)));
            assert!(send_message(a, b, Word::from_int(2)));
            let first = recv_message_from(b, a);
            let second = recv_message_from(b, a);
            assert_eq!(tern_get_msg(first).as_int(), 1);
            assert_eq!(tern_get_msg(second).as_int(), 2);
            tern_free_msg(first);
            tern_free_msg(second);
            close_vm(a);
            close_vm(b);
        }
    }

    #[test]
    fn test_peek_filters_by_sender() {
        let a = init_vm(64, 8192);
        let b = init_vm(64, 8192);
        let c = init_vm(64, 8192);
        unsafe {
            assert!(tern_check_messages(c).is_null());
            send_message(a, c, Word::from_int(10));
            send_message(b, c, Word::from_int(20));
            assert_eq!(tern_check_messages(c), a);
            assert_eq!(tern_check_messages_from(c, b), b);

            // Filtered receive skips the earlier entry and closes the gap.
            let from_b = recv_message_from(c, b);
            assert_eq!(tern_get_msg(from_b).as_int(), 20);
            tern_free_msg(from_b);
            let from_a = recv_message_from(c, std::ptr::null_mut());
            assert_eq!(tern_get_msg(from_a).as_int(), 10);
            tern_free_msg(from_a);

            close_vm(a);
            close_vm(b);
            close_vm(c);
        }
    }

    #[test]
    fn test_inbox_grows_past_initial_capacity() {
        let a = init_vm(64, 8192);
        let b = init_vm(64, 8192);
        unsafe {
            let count = (INBOX_INITIAL_CAPACITY + 50) as i64;
            for n in 0..count {
                assert!(send_message(a, b, Word::from_int(n)));
            }
            for n in 0..count {
                let msg = recv_message_from(b, std::ptr::null_mut());
                assert_eq!(tern_get_msg(msg).as_int(), n);
                tern_free_msg(msg);
            }
            close_vm(a);
            close_vm(b);
        }
    }

    #[test]
    fn test_nullary_payload_aliases_shared_cell() {
        crate::nullary::init_nullaries();
        let a = init_vm(64, 8192);
        let b = init_vm(64, 8192);
        unsafe {
            let unit = nullary(0);
            send_message(a, b, unit);
            let msg = recv_message_from(b, std::ptr::null_mut());
            assert_eq!(tern_get_msg(msg).bits(), unit.bits());
            tern_free_msg(msg);
            close_vm(a);
            close_vm(b);
        }
    }

    #[test]
    fn test_check_messages_timeout_returns_promptly_with_message() {
        let a = init_vm(64, 8192);
        let b = init_vm(64, 8192);
        unsafe {
            send_message(a, b, Word::from_int(5));
            assert_eq!(check_messages_timeout(b, 30), a);
            close_vm(a);
            close_vm(b);
        }
    }
}
