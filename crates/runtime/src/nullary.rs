//! The nullary constructor cache
//!
//! Zero-arity constructors with small tags are ubiquitous (booleans, unit,
//! enum-like variants), so the runtime pre-allocates one cell per tag
//! 0..=255 before any context starts. Compiled code refers to these cells
//! directly with no per-use allocation; the collector leaves them alone
//! because they live outside every moving heap's range.

use std::sync::OnceLock;

use tern_core::cell::{Cell, CellKind};
use tern_core::fatal::fatal;
use tern_core::word::Word;

struct NullaryTable {
    cells: Box<[Cell]>,
}

// Safety: the table is built once and read-only afterwards; the cells are
// plain headers with no interior mutability, and nothing ever writes
// through the words handed out by `nullary`.
unsafe impl Sync for NullaryTable {}
unsafe impl Send for NullaryTable {}

static NULLARIES: OnceLock<NullaryTable> = OnceLock::new();

/// Build the table. Idempotent; called from runtime startup.
pub fn init_nullaries() {
    NULLARIES.get_or_init(|| {
        let cells: Vec<Cell> = (0u32..256)
            .map(|tag| {
                let mut cell = Cell::raw(CellKind::Con, 0, 0);
                cell.set_con(tag, 0);
                cell
            })
            .collect();
        NullaryTable {
            cells: cells.into_boxed_slice(),
        }
    });
}

/// The shared arity-0 constructor cell for `tag`.
pub fn nullary(tag: u8) -> Word {
    let table = NULLARIES
        .get()
        .unwrap_or_else(|| fatal("nullary", "constructor table not initialised"));
    Word::from_cell(&table.cells[tag as usize] as *const Cell as *mut Cell)
}

#[unsafe(no_mangle)]
pub extern "C" fn tern_init_nullaries() {
    init_nullaries();
}

#[unsafe(no_mangle)]
pub extern "C" fn tern_nullary(tag: u32) -> Word {
    assert!(tag < 256, "nullary: tag {tag} out of range");
    nullary(tag as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nullary_identity() {
        init_nullaries();
        let a = nullary(3);
        let b = nullary(3);
        assert_eq!(a.bits(), b.bits(), "same tag aliases the same cell");
        assert_ne!(a.bits(), nullary(4).bits());
    }

    #[test]
    fn test_nullary_shape() {
        init_nullaries();
        for tag in [0u8, 1, 127, 255] {
            let w = nullary(tag);
            let cell = unsafe { &*w.as_cell() };
            assert_eq!(cell.kind(), CellKind::Con);
            assert_eq!(cell.con_tag(), tag as u32);
            assert_eq!(cell.con_arity(), 0);
        }
    }
}
