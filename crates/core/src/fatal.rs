//! Fatal runtime diagnostics
//!
//! Runtime-level failures (out of memory after a collection, stack
//! overflow, type-dispatch failure in a conversion) indicate an invariant
//! violation or resource exhaustion the compiled program cannot recover
//! from. They print a one-line diagnostic and exit with a non-zero status;
//! the compiled language's own error values are ordinary constructor cells
//! and never pass through here.

use std::fmt::Display;

/// Print `tern runtime error: <op>: <detail>` to stderr and exit.
#[cold]
pub fn fatal(op: &str, detail: impl Display) -> ! {
    eprintln!("tern runtime error: {op}: {detail}");
    std::process::exit(1);
}
