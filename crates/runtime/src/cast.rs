//! Conversions between numbers and strings
//!
//! Rendering formats the value first and sizes the string cell exactly.
//! Parsing follows the C library's prefix discipline: `cast_str_int`
//! accepts an optional sign and decimal digits, tolerates a trailing `\n`
//! or `\r`, and yields 0 for any other junk; `cast_str_float` reads the
//! longest numeric prefix and ignores the rest. Applying a cast to the
//! wrong cell kind is a fatal type-dispatch failure.

use tern_core::cell::CellKind;
use tern_core::fatal::fatal;
use tern_core::word::Word;

use crate::num::mk_float;
use crate::strings::{mk_str, str_slice};
use crate::vm::Vm;

/// Render an immediate integer as a decimal string cell.
///
/// # Safety
/// `vm` must point to a live context; `i` must be an immediate integer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_cast_int_str(vm: *mut Vm, i: Word) -> Word {
    unsafe { mk_str(vm, &i.as_int().to_string(), false) }
}

/// Render a fixed-width integer cell as a decimal string cell.
///
/// # Safety
/// `vm` must point to a live context; `w` must point to a live Bits cell.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_cast_bits_str(vm: *mut Vm, w: Word) -> Word {
    unsafe {
        let cell = &*w.as_cell();
        let rendered = match cell.kind() {
            CellKind::Bits8 | CellKind::Bits16 | CellKind::Bits32 | CellKind::Bits64 => {
                cell.bits_value().to_string()
            }
            kind => fatal(
                "cast_bits_str",
                format_args!("not a fixed-width integer: {kind:?}"),
            ),
        };
        mk_str(vm, &rendered, false)
    }
}

/// Parse a decimal string into an immediate integer.
///
/// # Safety
/// `s` must be a string value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_cast_str_int(vm: *mut Vm, s: Word) -> Word {
    let _ = vm;
    unsafe { Word::from_int(parse_int(str_slice(s))) }
}

/// Render a float cell with `%.16g`-style formatting.
///
/// # Safety
/// `vm` must point to a live context; `f` must point to a live Float cell.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_cast_float_str(vm: *mut Vm, f: Word) -> Word {
    unsafe {
        let value = (*f.as_cell()).float();
        mk_str(vm, &format_g16(value), false)
    }
}

/// Parse the longest numeric prefix of a string into a float cell.
///
/// # Safety
/// `vm` must point to a live context; `s` must be a string value.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn tern_cast_str_float(vm: *mut Vm, s: Word) -> Word {
    unsafe {
        let value = parse_float_prefix(str_slice(s));
        mk_float(vm, value, false)
    }
}

/// Decimal parse with strtol's shape: leading whitespace and a sign are
/// allowed, the value saturates at the i64 range, and any suffix other
/// than `\n` / `\r` turns the result into 0.
pub fn parse_int(s: &str) -> i64 {
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    let mut negative = false;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        negative = bytes[i] == b'-';
        i += 1;
    }
    let digits_start = i;
    let mut magnitude: i128 = 0;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        magnitude = magnitude * 10 + (bytes[i] - b'0') as i128;
        if magnitude > i64::MAX as i128 + 1 {
            magnitude = i64::MAX as i128 + 1;
        }
        i += 1;
    }
    if i == digits_start {
        return 0;
    }
    if !bytes[i..].iter().all(|&b| b == b'\n' || b == b'\r') {
        return 0;
    }
    if negative {
        (-magnitude).max(i64::MIN as i128) as i64
    } else {
        magnitude.min(i64::MAX as i128) as i64
    }
}

/// `%.16g`: sixteen significant digits, fixed or scientific by exponent,
/// trailing zeros trimmed.
pub fn format_g16(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let exponent = value.abs().log10().floor() as i32;
    if exponent < -4 || exponent >= 16 {
        let formatted = format!("{value:.15e}");
        let (mantissa, exp) = formatted
            .split_once('e')
            .expect("scientific format always has an exponent");
        let mut mantissa = mantissa.to_string();
        trim_fraction_zeros(&mut mantissa);
        format!("{mantissa}e{exp}")
    } else {
        let precision = (15 - exponent).max(0) as usize;
        let mut formatted = format!("{value:.precision$}");
        trim_fraction_zeros(&mut formatted);
        formatted
    }
}

fn trim_fraction_zeros(s: &mut String) {
    if s.contains('.') {
        while s.ends_with('0') {
            s.pop();
        }
        if s.ends_with('.') {
            s.pop();
        }
    }
}

/// The longest prefix matching `[ws][sign]digits[.digits][(e|E)[sign]digits]`,
/// parsed as a float; 0.0 when there is no such prefix.
pub fn parse_float_prefix(s: &str) -> f64 {
    let t = s.trim_start();
    let bytes = t.as_bytes();
    let mut i = 0;
    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }
    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut has_digits = i > int_start;
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        has_digits |= i > frac_start;
    }
    if !has_digits {
        return 0.0;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mark = i;
        i += 1;
        if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            i = mark;
        }
    }
    t[..i].parse().unwrap_or(0.0)
}
