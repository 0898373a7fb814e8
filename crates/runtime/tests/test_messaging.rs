//! Cross-context messaging: spawned OS threads exchanging deep-copied
//! values, per-sender ordering under real concurrency, and sends to
//! terminated contexts.

#![cfg(feature = "threads")]

use std::sync::atomic::Ordering;
use std::time::Duration;

use serial_test::serial;

use tern_core::cell::con_arg;
use tern_runtime::con::mk_con;
use tern_runtime::msg::{
    check_messages_timeout, recv_message_from, send_message, spawn, tern_free_msg,
};
use tern_runtime::nullary::init_nullaries;
use tern_runtime::num::tern_mk_bits32;
use tern_runtime::strings::str_slice;
use tern_runtime::vm::{Vm, close_vm, init_vm};
use tern_runtime::{Word, mk_str};

fn wait_until_inactive(vm: *mut Vm) {
    for _ in 0..500 {
        if unsafe { !(*vm).active.load(Ordering::SeqCst) } {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("context did not terminate in time");
}

/// Receives one constructor, verifies every cell landed in this context's
/// heap with the expected contents, and acks the sender with 1 or 0.
unsafe extern "C" fn verify_entry(vm: *mut Vm) {
    unsafe {
        let msg = recv_message_from(vm, std::ptr::null_mut());
        let payload = (*msg).msg;
        let sender = (*msg).sender;
        tern_free_msg(msg);
        // Root the payload in the return register before anything else.
        (*vm).ret = payload;

        let cell = payload.as_cell();
        let text = con_arg(cell, 0);
        let bits = con_arg(cell, 1);
        let ok = (*vm).heap.contains(payload)
            && (*vm).heap.contains(text)
            && (*vm).heap.contains(bits)
            && (*cell).con_tag() == 3
            && str_slice(text) == "x"
            && (*bits.as_cell()).bits_value() == 0xDEAD_BEEF;
        send_message(vm, sender, Word::from_int(ok as i64));
    }
}

#[test]
#[serial]
fn test_spawned_child_receives_deep_copy() {
    init_nullaries();
    let parent = init_vm(1024, 64 * 1024);
    unsafe {
        let child = spawn(parent, verify_entry, Word::NULL);

        let payload = mk_con(
            parent,
            3,
            &[
                mk_str(parent, "x", false),
                tern_mk_bits32(parent, 0xDEAD_BEEF),
            ],
        );
        assert!(send_message(parent, child, payload));

        let ack = recv_message_from(parent, child);
        assert_eq!(
            tern_runtime::msg::tern_get_msg(ack).as_int(),
            1,
            "child saw a deep-equal constructor inside its own heap"
        );
        tern_free_msg(ack);

        wait_until_inactive(child);
        close_vm(parent);
    }
}

/// Receives integers until -1, checking they arrive in send order, then
/// acks with 1 or 0.
unsafe extern "C" fn ordered_entry(vm: *mut Vm) {
    unsafe {
        let mut expected = 0i64;
        let mut ok = true;
        let sender = loop {
            let msg = recv_message_from(vm, std::ptr::null_mut());
            let value = (*msg).msg.as_int();
            let from = (*msg).sender;
            tern_free_msg(msg);
            if value == -1 {
                break from;
            }
            ok &= value == expected;
            expected += 1;
        };
        send_message(vm, sender, Word::from_int(ok as i64));
    }
}

#[test]
#[serial]
fn test_per_sender_fifo_across_threads() {
    init_nullaries();
    let parent = init_vm(1024, 64 * 1024);
    unsafe {
        let child = spawn(parent, ordered_entry, Word::NULL);
        for n in 0..100 {
            assert!(send_message(parent, child, Word::from_int(n)));
        }
        assert!(send_message(parent, child, Word::from_int(-1)));

        let ack = recv_message_from(parent, child);
        assert_eq!(tern_runtime::msg::tern_get_msg(ack).as_int(), 1);
        tern_free_msg(ack);

        wait_until_inactive(child);
        close_vm(parent);
    }
}

/// Terminates immediately; used to produce a dead destination.
unsafe extern "C" fn quit_entry(_vm: *mut Vm) {}

#[test]
#[serial]
fn test_send_to_terminated_child_fails_gracefully() {
    init_nullaries();
    let parent = init_vm(1024, 64 * 1024);
    unsafe {
        let child = spawn(parent, quit_entry, Word::NULL);
        wait_until_inactive(child);
        assert!(!send_message(parent, child, Word::from_int(42)));
        close_vm(parent);
    }
}

#[test]
#[serial]
fn test_timeout_peek_with_no_traffic() {
    init_nullaries();
    let vm = init_vm(1024, 64 * 1024);
    unsafe {
        assert!(check_messages_timeout(vm, 1).is_null());
        close_vm(vm);
    }
}

/// Echoes its spawn argument back to whoever messages it first.
unsafe extern "C" fn echo_arg_entry(vm: *mut Vm) {
    unsafe {
        let arg = (*vm).stack.pop();
        let msg = recv_message_from(vm, std::ptr::null_mut());
        let sender = (*msg).sender;
        tern_free_msg(msg);
        send_message(vm, sender, arg);
    }
}

#[test]
#[serial]
fn test_spawn_argument_is_precopied() {
    init_nullaries();
    let parent = init_vm(1024, 64 * 1024);
    unsafe {
        let hello = mk_str(parent, "hello child", false);
        let child = spawn(parent, echo_arg_entry, hello);
        assert!(send_message(parent, child, Word::from_int(0)));

        let reply = recv_message_from(parent, child);
        let echoed = tern_runtime::msg::tern_get_msg(reply);
        tern_free_msg(reply);
        assert_eq!(str_slice(echoed), "hello child");
        assert!((*parent).heap.contains(echoed));

        wait_until_inactive(child);
        close_vm(parent);
    }
}
