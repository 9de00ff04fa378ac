use crate::CrashContext;

#[repr(C)]
#[derive(Clone)]
pub struct sigset_t {
    #[cfg(target_pointer_width = "32")]
    __val: [u32; 32],
    #[cfg(target_pointer_width = "64")]
    __val: [u64; 16],
}

#[repr(C)]
#[derive(Clone)]
pub struct stack_t {
    pub ss_sp: *mut std::ffi::c_void,
    pub ss_flags: i32,
    pub ss_size: usize,
}

// Only the leading part of each layout is ever read, but the full layouts are
// kept so that a `ucontext_t` can be built in tests and copied around.
cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        /// Index of `RIP` in [`mcontext_t::gregs`]
        pub const REG_RIP: usize = 16;

        #[repr(C)]
        #[derive(Clone)]
        pub struct ucontext_t {
            pub uc_flags: u64,
            pub uc_link: *mut ucontext_t,
            pub uc_stack: stack_t,
            pub uc_mcontext: mcontext_t,
            pub uc_sigmask: sigset_t,
            __private: [u8; 512],
        }

        #[repr(C)]
        #[derive(Clone)]
        pub struct mcontext_t {
            pub gregs: [i64; 23],
            pub fpregs: *mut std::ffi::c_void,
            __reserved: [u64; 8],
        }

        impl ucontext_t {
            #[inline]
            pub fn instruction_pointer(&self) -> usize {
                self.uc_mcontext.gregs[REG_RIP] as usize
            }

            #[inline]
            pub fn set_instruction_pointer(&mut self, ip: usize) {
                self.uc_mcontext.gregs[REG_RIP] = ip as i64;
            }
        }
    } else if #[cfg(target_arch = "x86")] {
        /// Index of `EIP` in [`mcontext_t::gregs`]
        pub const REG_EIP: usize = 14;

        #[repr(C)]
        #[derive(Clone)]
        pub struct ucontext_t {
            pub uc_flags: u32,
            pub uc_link: *mut ucontext_t,
            pub uc_stack: stack_t,
            pub uc_mcontext: mcontext_t,
            pub uc_sigmask: sigset_t,
            pub __fpregs_mem: [u32; 28],
        }

        #[repr(C)]
        #[derive(Clone)]
        pub struct mcontext_t {
            pub gregs: [i32; 19],
            pub fpregs: *mut std::ffi::c_void,
            pub oldmask: u32,
            pub cr2: u32,
        }

        impl ucontext_t {
            #[inline]
            pub fn instruction_pointer(&self) -> usize {
                self.uc_mcontext.gregs[REG_EIP] as u32 as usize
            }

            #[inline]
            pub fn set_instruction_pointer(&mut self, ip: usize) {
                self.uc_mcontext.gregs[REG_EIP] = ip as u32 as i32;
            }
        }
    } else if #[cfg(target_arch = "aarch64")] {
        #[repr(C)]
        #[derive(Clone)]
        pub struct ucontext_t {
            pub uc_flags: u64,
            pub uc_link: *mut ucontext_t,
            pub uc_stack: stack_t,
            pub uc_sigmask: sigset_t,
            pub uc_mcontext: mcontext_t,
        }

        #[repr(C, align(16))]
        #[derive(Clone)]
        pub struct mcontext_t {
            pub fault_address: u64,
            pub regs: [u64; 31],
            pub sp: u64,
            pub pc: u64,
            pub pstate: u64,
            __reserved: [u8; 4096],
        }

        impl ucontext_t {
            #[inline]
            pub fn instruction_pointer(&self) -> usize {
                self.uc_mcontext.pc as usize
            }

            #[inline]
            pub fn set_instruction_pointer(&mut self, ip: usize) {
                self.uc_mcontext.pc = ip as u64;
            }
        }
    } else if #[cfg(target_arch = "arm")] {
        #[repr(C)]
        #[derive(Clone)]
        pub struct ucontext_t {
            pub uc_flags: u32,
            pub uc_link: *mut ucontext_t,
            pub uc_stack: stack_t,
            pub uc_mcontext: mcontext_t,
            pub uc_sigmask: sigset_t,
        }

        #[repr(C)]
        #[derive(Clone)]
        pub struct mcontext_t {
            pub trap_no: u32,
            pub error_code: u32,
            pub oldmask: u32,
            pub arm_r: [u32; 11],
            pub arm_fp: u32,
            pub arm_ip: u32,
            pub arm_sp: u32,
            pub arm_lr: u32,
            pub arm_pc: u32,
            pub arm_cpsr: u32,
            pub fault_address: u32,
        }

        impl ucontext_t {
            #[inline]
            pub fn instruction_pointer(&self) -> usize {
                self.uc_mcontext.arm_pc as usize
            }

            #[inline]
            pub fn set_instruction_pointer(&mut self, ip: usize) {
                self.uc_mcontext.arm_pc = ip as u32;
            }
        }
    }
}

impl CrashContext {
    /// Builds a context from an already dereferenced thread context.
    #[cfg(any(
        target_arch = "x86_64",
        target_arch = "x86",
        target_arch = "aarch64",
        target_arch = "arm"
    ))]
    #[inline]
    pub fn from_context(signal: i32, fault_address: usize, context: Option<&ucontext_t>) -> Self {
        Self::new(
            signal,
            fault_address,
            context.map(ucontext_t::instruction_pointer),
        )
    }

    /// Builds a context from the raw arguments handed to a `SA_SIGINFO`
    /// signal handler.
    ///
    /// Either pointer may be null, in which case the corresponding value is
    /// reported as unknown rather than dereferenced.
    ///
    /// # Safety
    ///
    /// Non-null pointers must point to the `siginfo_t` and `ucontext_t` the
    /// kernel delivered for `signal`.
    pub unsafe fn from_raw(
        signal: i32,
        info: *const libc::siginfo_t,
        context: *const std::ffi::c_void,
    ) -> Self {
        let fault_address = if info.is_null() {
            0
        } else {
            // SAFETY: non-null and kernel provided, see function docs
            unsafe { (*info).si_addr() as usize }
        };

        Self::new(signal, fault_address, unsafe { read_instruction_pointer(context) })
    }
}

#[cfg(any(
    target_arch = "x86_64",
    target_arch = "x86",
    target_arch = "aarch64",
    target_arch = "arm"
))]
#[inline]
unsafe fn read_instruction_pointer(context: *const std::ffi::c_void) -> Option<usize> {
    unsafe {
        context
            .cast::<ucontext_t>()
            .as_ref()
            .map(ucontext_t::instruction_pointer)
    }
}

#[cfg(not(any(
    target_arch = "x86_64",
    target_arch = "x86",
    target_arch = "aarch64",
    target_arch = "arm"
)))]
#[inline]
unsafe fn read_instruction_pointer(_context: *const std::ffi::c_void) -> Option<usize> {
    None
}
