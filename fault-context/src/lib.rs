//! Provides [`CrashContext`], a small, copyable description of a thread at
//! the moment it raised a fatal signal.
//!
//! Unlike a full register dump this only keeps what a textual crash report
//! needs: the signal number, the address that could not be accessed and the
//! address of the instruction that tried to access it.
//!
//! Extraction from the kernel supplied `siginfo_t` and `ucontext_t` is done
//! without calling into anything that isn't reentrant, so it can be done from
//! within a signal handler.

// crate-specific exceptions:
#![allow(unsafe_code, nonstandard_style)]

use std::fmt;

cfg_if::cfg_if! {
    if #[cfg(any(target_os = "linux", target_os = "android"))] {
        mod linux;
        pub use linux::*;
    }
}

/// The state of the faulting thread as delivered by the kernel
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CrashContext {
    /// The signal that was raised, eg. `SIGSEGV`
    pub signal: i32,
    /// The memory address whose access caused the fault, `0` if the signal
    /// info was not available
    pub fault_address: usize,
    /// The last executed instruction of the faulting thread, `None` if the
    /// thread context was not delivered or is not understood for the target
    /// architecture
    pub instruction_pointer: Option<usize>,
}

impl CrashContext {
    #[inline]
    pub const fn new(signal: i32, fault_address: usize, instruction_pointer: Option<usize>) -> Self {
        Self {
            signal,
            fault_address,
            instruction_pointer,
        }
    }
}

/// Displays an optional address the way `%p` would, with a placeholder when
/// the address is not known
pub struct Address(pub Option<usize>);

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(addr) => write!(f, "{addr:#x}"),
            None => f.write_str("(unknown)"),
        }
    }
}

impl fmt::Display for CrashContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Got signal {}, faulty address is {}, from {}",
            self.signal,
            Address(Some(self.fault_address)),
            Address(self.instruction_pointer),
        )
    }
}
