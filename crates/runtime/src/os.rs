//! OS queries
//!
//! System identification for compiled code plus the errno pair used by
//! foreign-function bindings.

use tern_core::word::Word;

use crate::strings::mk_str;
use crate::vm::Vm;

fn target_triple() -> String {
    format!(
        "{}-unknown-{}",
        std::env::consts::ARCH,
        std::env::consts::OS
    )
}

/// Enumerated system query: 0 → backend name, 1 → target OS name,
/// 2 → target triple. Anything else yields the empty string.
///
/// # Safety
/// `vm` must point to a live context; `index` must be an immediate
/// integer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_system_info(vm: *mut Vm, index: Word) -> Word {
    unsafe {
        match index.as_int() {
            0 => mk_str(vm, "llvm", false),
            1 => mk_str(vm, std::env::consts::OS, false),
            2 => mk_str(vm, &target_triple(), false),
            _ => mk_str(vm, "", false),
        }
    }
}

/// The calling thread's last OS error code.
#[unsafe(no_mangle)]
pub extern "C" fn tern_errno() -> i64 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0) as i64
}

/// Render an OS error code as a message string cell.
///
/// # Safety
/// `vm` must point to a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_show_error(vm: *mut Vm, err: i64) -> Word {
    unsafe {
        let message = std::io::Error::from_raw_os_error(err as i32).to_string();
        mk_str(vm, &message, false)
    }
}
