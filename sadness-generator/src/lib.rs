//! Ways to raise `SIGSEGV` with known details, so that what a fault handler
//! reports can be checked.

use std::arch::asm;

/// The address [`raise_segfault`] reads from
pub const SEGFAULT_ADDRESS: usize = 0xdeadbeef;

/// The ways this crate can make a program sad
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SadnessFlavor {
    /// Reads from [`SEGFAULT_ADDRESS`]
    Segfault,
    /// Reads through a null reference
    NullDeref,
    /// Overflows the stack of the calling thread
    StackOverflow,
}

impl SadnessFlavor {
    /// Makes the program sad.
    ///
    /// # Safety
    ///
    /// This is not safe. It intentionally crashes.
    pub unsafe fn make_sad(self) -> ! {
        unsafe {
            match self {
                Self::Segfault => raise_segfault_at(SEGFAULT_ADDRESS),
                Self::NullDeref => raise_null_deref(),
                Self::StackOverflow => raise_stack_overflow(),
            }
        }

        // None of the above return unless a handler skipped the fault
        std::process::abort()
    }
}

/// Raises `SIGSEGV` by reading from [`SEGFAULT_ADDRESS`]
///
/// # Safety
///
/// This is not safe. It intentionally crashes.
#[inline(never)]
pub unsafe fn raise_segfault() {
    unsafe { raise_segfault_at(SEGFAULT_ADDRESS) }
}

/// Raises `SIGSEGV` by reading from the specified address, which must not be
/// mapped
///
/// # Safety
///
/// This is not safe. It intentionally crashes.
#[inline(never)]
pub unsafe fn raise_segfault_at(address: usize) {
    let value = unsafe { load_byte(address) };
    println!("we should have crashed reading {address:#x}, but got {value}");
}

/// Raises `SIGSEGV` by reading from address 0
///
/// # Safety
///
/// This is not safe. It intentionally crashes.
#[inline(never)]
pub unsafe fn raise_null_deref() {
    let value = unsafe { load_byte(0) };
    println!("we are crashing by reading from null: {value}");
}

/// Reads a single byte with a plain load instruction, which is neither
/// subject to alignment or null checks, nor can be optimized away
#[inline(always)]
unsafe fn load_byte(address: usize) -> u32 {
    let value: u32;

    unsafe {
        cfg_if::cfg_if! {
            if #[cfg(any(target_arch = "x86_64", target_arch = "x86"))] {
                asm!(
                    "movzx {value:e}, byte ptr [{addr}]",
                    addr = in(reg) address,
                    value = out(reg) value,
                    options(nostack, preserves_flags),
                );
            } else if #[cfg(target_arch = "aarch64")] {
                asm!(
                    "ldrb {value:w}, [{addr}]",
                    addr = in(reg) address,
                    value = out(reg) value,
                    options(nostack, preserves_flags),
                );
            } else if #[cfg(target_arch = "arm")] {
                asm!(
                    "ldrb {value}, [{addr}]",
                    addr = in(reg) address,
                    value = out(reg) value,
                    options(nostack, preserves_flags),
                );
            } else {
                value = u32::from(std::ptr::read_volatile(std::hint::black_box(address) as *const u8));
            }
        }
    }

    value
}

/// Raises `SIGSEGV` by overflowing the stack of the calling thread, which
/// must have a stack smaller than 9MiB, eg. the main thread with the default
/// `ulimit -s`
///
/// # Safety
///
/// This is not safe. It intentionally crashes.
#[inline(never)]
pub unsafe fn raise_stack_overflow() {
    let mut big_boi = [0u8; 9 * 1024 * 1024];
    big_boi[big_boi.len() - 1] = 1;

    println!("{:?}", &big_boi[big_boi.len() - 20..]);
}
