//! Turns a return address into the textual description of where it lives, in
//! the same layout `backtrace_symbols(3)` uses, eg.
//! `./app(main+0x20) [0x4008f0]`

use crate::{line::LineBuf, LINE_BUFFER_SIZE, MODULE_SCAN_LIMIT};
use std::{ffi::CStr, fmt::Write};

pub type RawSymbolLine = LineBuf<LINE_BUFFER_SIZE>;

/// Describes a single address
pub trait Symbolize {
    /// Writes the raw symbol line for `address` into `line`, which is empty
    fn describe(&self, address: usize, line: &mut RawSymbolLine);
}

/// Describes addresses with `dladdr(3)`, which only consults the dynamic
/// symbol table of the loaded objects and never allocates
#[derive(Copy, Clone)]
pub struct Dladdr {
    pub demangle: bool,
}

impl Symbolize for Dladdr {
    fn describe(&self, address: usize, line: &mut RawSymbolLine) {
        let mut info = std::mem::MaybeUninit::<libc::Dl_info>::zeroed();
        // SAFETY: syscall, dladdr accepts any address
        let found = unsafe { libc::dladdr(address as *const libc::c_void, info.as_mut_ptr()) };

        if found != 0 {
            // SAFETY: zero initialized and filled in on success
            let info = unsafe { info.assume_init() };

            if !info.dli_fname.is_null() {
                // SAFETY: dladdr gives us nul terminated strings
                line.push_bytes(unsafe { CStr::from_ptr(info.dli_fname) }.to_bytes());
            }

            if !info.dli_sname.is_null() {
                line.push_str("(");
                // SAFETY: as above
                let name = unsafe { CStr::from_ptr(info.dli_sname) }.to_bytes();
                self.write_name(name, line);
                let _ = write!(line, "+{:#x})", address.wrapping_sub(info.dli_saddr as usize));
            } else if !info.dli_fbase.is_null() {
                let _ = write!(line, "(+{:#x})", address.wrapping_sub(info.dli_fbase as usize));
            }

            line.push_str(" ");
        }

        let _ = write!(line, "[{address:#x}]");
    }
}

impl Dladdr {
    fn write_name(&self, name: &[u8], line: &mut RawSymbolLine) {
        match std::str::from_utf8(name) {
            Ok(name) if self.demangle => {
                // The alternate format omits the hash, demangling itself is
                // done lazily during formatting, without allocating
                let _ = write!(line, "{:#}", rustc_demangle::demangle(name));
            }
            _ => line.push_bytes(name),
        }
    }
}

/// Returns the path of the module a raw symbol line refers to.
///
/// This is the prefix of the line up to the first `(`, whitespace, or nul,
/// whichever comes first. If none of them appear within [`MODULE_SCAN_LIMIT`]
/// bytes the line is truncated to that limit.
pub fn module_path(line: &[u8]) -> &[u8] {
    let bounded = &line[..line.len().min(MODULE_SCAN_LIMIT)];

    let end = bounded
        .iter()
        .position(|&b| b == b'(' || b == 0 || b.is_ascii_whitespace())
        .unwrap_or(bounded.len());

    &bounded[..end]
}
