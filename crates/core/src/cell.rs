//! Heap cell layout
//!
//! Every heap-allocated value is a *cell*: a fixed 24-byte header followed
//! by kind-specific payload stored inline. The allocator additionally
//! prepends an 8-byte chunk-size word, so the collector can walk a space
//! without knowing anything about cell kinds.
//!
//! ```text
//! ┌────────────┬──────────┬────────┬────────┬──────────────────┐
//! │ chunk size │   kind   │   w0   │   w1   │ inline payload…  │
//! │  (8 bytes) │ (8 bytes)│ (8 B)  │ (8 B)  │ (args / bytes)   │
//! └────────────┴──────────┴────────┴────────┴──────────────────┘
//!              ↑ cell pointer
//! ```
//!
//! Payload word meanings per kind:
//!
//! | kind       | w0                          | w1           | tail            |
//! |------------|-----------------------------|--------------|-----------------|
//! | Con        | tag (high 32) / arity (low) | —            | arity × Word    |
//! | Float      | f64 bits                    | —            | —               |
//! | Str        | data ptr into own tail      | —            | NUL-terminated  |
//! | StrOffset  | root string cell (Word)     | byte offset  | —               |
//! | BigInt     | opaque arena pointer        | —            | —               |
//! | Ptr        | raw pointer                 | —            | —               |
//! | ManagedPtr | data ptr into own tail      | byte size    | owned bytes     |
//! | CData      | foreign-heap entry pointer  | —            | —               |
//! | Bits8..64  | zero-extended value         | —            | —               |
//! | RawData    | byte size                   | —            | raw bytes       |
//! | Fwd        | forwarded cell address      | —            | —               |
//!
//! Accessors are kind-checked in debug builds and unchecked in release;
//! compiled code only touches fields consistent with the cell's kind.

use crate::word::Word;

/// Discriminant stored in a cell's first header word.
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    Con = 0,
    Float = 1,
    Str = 2,
    StrOffset = 3,
    BigInt = 4,
    Ptr = 5,
    ManagedPtr = 6,
    CData = 7,
    Bits8 = 8,
    Bits16 = 9,
    Bits32 = 10,
    Bits64 = 11,
    RawData = 12,
    Fwd = 13,
}

impl CellKind {
    /// Decode a kind word. Kind words are only ever written from
    /// `CellKind` values, so the range check is debug-only.
    #[inline(always)]
    pub fn from_raw(raw: u64) -> CellKind {
        debug_assert!(raw <= CellKind::Fwd as u64, "cell kind out of range: {raw}");
        unsafe { std::mem::transmute::<u64, CellKind>(raw) }
    }
}

/// A heap cell header. The variable payload, when present, follows the
/// header directly; use the `*_payload` helpers to reach it.
#[repr(C)]
pub struct Cell {
    kind: u64,
    w0: u64,
    w1: u64,
}

/// Size of the fixed cell header in bytes.
pub const CELL_HEADER_SIZE: usize = std::mem::size_of::<Cell>();

const _: () = assert!(CELL_HEADER_SIZE == 24, "Cell header must be 24 bytes");

/// Size of the chunk-size word the allocator prepends to every cell.
pub const CHUNK_HEADER_SIZE: usize = std::mem::size_of::<u64>();

/// Allocation size for a constructor cell of the given arity.
#[inline]
pub const fn con_size(arity: u32) -> usize {
    CELL_HEADER_SIZE + arity as usize * std::mem::size_of::<Word>()
}

/// Allocation size for a string cell holding `bytes_with_nul` bytes.
#[inline]
pub const fn str_size(bytes_with_nul: usize) -> usize {
    CELL_HEADER_SIZE + bytes_with_nul
}

/// Allocation size for a managed-pointer cell owning `bytes` bytes.
#[inline]
pub const fn managed_size(bytes: usize) -> usize {
    CELL_HEADER_SIZE + bytes
}

/// Allocation size for a raw-data cell of `bytes` bytes.
#[inline]
pub const fn raw_data_size(bytes: usize) -> usize {
    CELL_HEADER_SIZE + bytes
}

impl Cell {
    /// Build a bare header; used for the nullary constructor table, which
    /// lives outside any moving heap.
    pub const fn raw(kind: CellKind, w0: u64, w1: u64) -> Cell {
        Cell {
            kind: kind as u64,
            w0,
            w1,
        }
    }

    #[inline(always)]
    pub fn kind(&self) -> CellKind {
        CellKind::from_raw(self.kind)
    }

    #[inline(always)]
    pub fn set_kind(&mut self, kind: CellKind) {
        self.kind = kind as u64;
    }

    // --- Con ---------------------------------------------------------------

    #[inline]
    pub fn set_con(&mut self, tag: u32, arity: u32) {
        self.kind = CellKind::Con as u64;
        self.w0 = ((tag as u64) << 32) | arity as u64;
    }

    #[inline(always)]
    pub fn con_tag(&self) -> u32 {
        debug_assert!(self.kind() == CellKind::Con, "con_tag: not a Con cell");
        (self.w0 >> 32) as u32
    }

    #[inline(always)]
    pub fn con_arity(&self) -> u32 {
        debug_assert!(self.kind() == CellKind::Con, "con_arity: not a Con cell");
        self.w0 as u32
    }

    // --- Float -------------------------------------------------------------

    #[inline]
    pub fn set_float(&mut self, value: f64) {
        self.kind = CellKind::Float as u64;
        self.w0 = value.to_bits();
    }

    #[inline(always)]
    pub fn float(&self) -> f64 {
        debug_assert!(self.kind() == CellKind::Float, "float: not a Float cell");
        f64::from_bits(self.w0)
    }

    // --- Str ---------------------------------------------------------------

    #[inline]
    pub fn set_str_data(&mut self, data: *const u8) {
        self.kind = CellKind::Str as u64;
        self.w0 = data as u64;
    }

    /// The string's data pointer. Null for the NULL-source string, which is
    /// distinct from the empty string.
    #[inline(always)]
    pub fn str_data(&self) -> *const u8 {
        debug_assert!(self.kind() == CellKind::Str, "str_data: not a Str cell");
        self.w0 as *const u8
    }

    // --- StrOffset ---------------------------------------------------------

    #[inline]
    pub fn set_str_offset(&mut self, root: Word, byte_offset: usize) {
        self.kind = CellKind::StrOffset as u64;
        self.w0 = root.bits();
        self.w1 = byte_offset as u64;
    }

    #[inline(always)]
    pub fn str_off_root(&self) -> Word {
        debug_assert!(
            self.kind() == CellKind::StrOffset,
            "str_off_root: not a StrOffset cell"
        );
        Word::from_cell(self.w0 as *mut Cell)
    }

    /// Rewrite the root reference; only the collector does this.
    #[inline]
    pub fn set_str_off_root(&mut self, root: Word) {
        debug_assert!(self.kind() == CellKind::StrOffset);
        self.w0 = root.bits();
    }

    #[inline(always)]
    pub fn str_off_offset(&self) -> usize {
        debug_assert!(
            self.kind() == CellKind::StrOffset,
            "str_off_offset: not a StrOffset cell"
        );
        self.w1 as usize
    }

    // --- BigInt / Ptr / CData ----------------------------------------------

    #[inline]
    pub fn set_opaque(&mut self, kind: CellKind, ptr: *mut u8) {
        debug_assert!(matches!(
            kind,
            CellKind::BigInt | CellKind::Ptr | CellKind::CData
        ));
        self.kind = kind as u64;
        self.w0 = ptr as u64;
    }

    /// Payload pointer of a BigInt, Ptr, or CData cell.
    #[inline(always)]
    pub fn opaque_ptr(&self) -> *mut u8 {
        debug_assert!(
            matches!(
                self.kind(),
                CellKind::BigInt | CellKind::Ptr | CellKind::CData
            ),
            "opaque_ptr: cell has no pointer payload"
        );
        self.w0 as *mut u8
    }

    // --- ManagedPtr --------------------------------------------------------

    #[inline]
    pub fn set_managed(&mut self, data: *mut u8, size: usize) {
        self.kind = CellKind::ManagedPtr as u64;
        self.w0 = data as u64;
        self.w1 = size as u64;
    }

    #[inline(always)]
    pub fn managed_data(&self) -> *mut u8 {
        debug_assert!(
            self.kind() == CellKind::ManagedPtr,
            "managed_data: not a ManagedPtr cell"
        );
        self.w0 as *mut u8
    }

    #[inline(always)]
    pub fn managed_size(&self) -> usize {
        debug_assert!(
            self.kind() == CellKind::ManagedPtr,
            "managed_size: not a ManagedPtr cell"
        );
        self.w1 as usize
    }

    // --- Bits --------------------------------------------------------------

    #[inline]
    pub fn set_bits(&mut self, kind: CellKind, value: u64) {
        debug_assert!(matches!(
            kind,
            CellKind::Bits8 | CellKind::Bits16 | CellKind::Bits32 | CellKind::Bits64
        ));
        self.kind = kind as u64;
        self.w0 = value;
    }

    /// Zero-extended payload of any Bits cell.
    #[inline(always)]
    pub fn bits_value(&self) -> u64 {
        debug_assert!(
            matches!(
                self.kind(),
                CellKind::Bits8 | CellKind::Bits16 | CellKind::Bits32 | CellKind::Bits64
            ),
            "bits_value: not a Bits cell"
        );
        self.w0
    }

    // --- RawData -----------------------------------------------------------

    #[inline]
    pub fn set_raw_data(&mut self, size: usize) {
        self.kind = CellKind::RawData as u64;
        self.w0 = size as u64;
    }

    #[inline(always)]
    pub fn raw_data_len(&self) -> usize {
        debug_assert!(
            self.kind() == CellKind::RawData,
            "raw_data_len: not a RawData cell"
        );
        self.w0 as usize
    }

    // --- Fwd ---------------------------------------------------------------

    /// Only valid mid-collection: the cell has been moved and `w0` holds
    /// its new address.
    #[inline]
    pub fn set_fwd(&mut self, target: *mut Cell) {
        self.kind = CellKind::Fwd as u64;
        self.w0 = target as u64;
    }

    #[inline(always)]
    pub fn fwd(&self) -> *mut Cell {
        debug_assert!(self.kind() == CellKind::Fwd, "fwd: not a forwarding cell");
        self.w0 as *mut Cell
    }
}

// ---------------------------------------------------------------------------
// Payload address helpers
//
// These take raw cell pointers because the payload lives past the header
// and the caller is responsible for the cell's allocation being large
// enough (the size helpers above compute that).
// ---------------------------------------------------------------------------

/// Address of the inline payload directly after the header.
///
/// # Safety
/// `cell` must point to a live cell whose allocation extends past the
/// header.
#[inline(always)]
pub unsafe fn payload_ptr(cell: *mut Cell) -> *mut u8 {
    unsafe { (cell as *mut u8).add(CELL_HEADER_SIZE) }
}

/// Address of a Con cell's argument array.
///
/// # Safety
/// `cell` must point to a live Con cell.
#[inline(always)]
pub unsafe fn con_args_ptr(cell: *mut Cell) -> *mut Word {
    debug_assert!(unsafe { (*cell).kind() } == CellKind::Con);
    unsafe { payload_ptr(cell) as *mut Word }
}

/// Read a Con cell argument.
///
/// # Safety
/// `cell` must point to a live Con cell and `i` must be below its arity.
#[inline(always)]
pub unsafe fn con_arg(cell: *mut Cell, i: u32) -> Word {
    debug_assert!(i < unsafe { (*cell).con_arity() }, "con_arg: index {i} out of range");
    unsafe { *con_args_ptr(cell).add(i as usize) }
}

/// Write a Con cell argument.
///
/// # Safety
/// `cell` must point to a live Con cell and `i` must be below its arity.
#[inline(always)]
pub unsafe fn con_set_arg(cell: *mut Cell, i: u32, value: Word) {
    debug_assert!(i < unsafe { (*cell).con_arity() }, "con_set_arg: index {i} out of range");
    unsafe { *con_args_ptr(cell).add(i as usize) = value }
}
