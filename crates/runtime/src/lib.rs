//! Tern Runtime: the execution core of compiled Tern programs
//!
//! Compiled code lowers to sequences of primitive operations against this
//! library: allocate tagged cells, move values through the per-context
//! stack and registers, and — in multi-context builds — spawn sibling
//! contexts and exchange values by deep copy.
//!
//! Key design principles:
//! - One context per OS thread, each with its own moving heap; nothing is
//!   shared but the read-only nullary table and, briefly, a destination
//!   heap under its allocation lock during a message copy.
//! - Allocation is a bump; compaction happens only at safe points and the
//!   collector rewrites every root it knows about.
//! - Foreign resources live in a side table keyed by reachability, never
//!   in the moving heap.

pub mod args;
pub mod cast;
pub mod con;
pub mod foreign;
pub mod gc;
pub mod heap;
pub mod io;
pub mod mem;
#[cfg(feature = "threads")]
pub mod msg;
pub mod nullary;
pub mod num;
pub mod os;
pub mod report;
pub mod signal;
pub mod strings;
pub mod utf8;
pub mod vm;

// Re-export key types and entry points
pub use tern_core::{Cell, CellKind, Stats, StatsSnapshot, ValueStack, Word};

pub use vm::{EntryFn, Vm, bind_vm, close_vm, current_vm, init_vm, rts_init, run, terminate};

pub use heap::{allocate, done_alloc, require_alloc};

pub use foreign::{Finalizer, ForeignHeap, ForeignItem, create_item, mk_cdata};

pub use con::{alloc_con, mk_con};
pub use num::{mk_bits, mk_float};
pub use strings::{mk_str, str_slice};

#[cfg(feature = "threads")]
pub use msg::{
    Msg, check_messages_from, check_messages_timeout, copy_value, recv_message_from, send_message,
    spawn,
};
