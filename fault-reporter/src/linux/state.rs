use super::HandlerState;
use crate::{
    report, resolve::ExternalResolver, symbolize::Dladdr, unwind::Frames, Config, CrashContext,
    Error, Sink,
};
use std::{
    mem, ptr,
    sync::atomic::{AtomicI32, AtomicU8, Ordering},
};

// std::cmp::max is not const :(
const fn get_stack_size() -> usize {
    if libc::SIGSTKSZ > 64 * 1024 {
        libc::SIGSTKSZ
    } else {
        64 * 1024
    }
}

/// The size of the alternate stack that is mapped for the attaching thread.
///
/// This has a minimum size of 64k, the report is formatted into buffers on
/// the stack, and both the unwinder and `dladdr` need room as well. The
/// memory is only committed if we actually get a stack overflow.
const SIG_STACK_SIZE: usize = get_stack_size();

/// Create an alternative stack to run the signal handler on. This is done since
/// the signal might have been caused by a stack overflow.
pub(super) unsafe fn install_sigaltstack() -> Result<(), Error> {
    unsafe {
        // Check to see if the existing sigaltstack, and if it exists, is it big
        // enough. If so we don't need to allocate our own.
        let mut old_stack: libc::stack_t = mem::zeroed();
        if libc::sigaltstack(ptr::null(), &mut old_stack) == -1 {
            return Err(std::io::Error::last_os_error().into());
        }

        if old_stack.ss_flags & libc::SS_DISABLE == 0 && old_stack.ss_size >= SIG_STACK_SIZE {
            return Ok(());
        }

        // The first page is left inaccessible as a guard
        let guard_size = libc::sysconf(libc::_SC_PAGESIZE) as usize;
        let alloc_size = guard_size + SIG_STACK_SIZE;

        let ptr = libc::mmap(
            ptr::null_mut(),
            alloc_size,
            libc::PROT_NONE,
            libc::MAP_PRIVATE | libc::MAP_ANON,
            -1,
            0,
        );
        if ptr == libc::MAP_FAILED {
            return Err(Error::OutOfMemory);
        }

        let stack_ptr = (ptr as usize + guard_size) as *mut libc::c_void;
        if libc::mprotect(
            stack_ptr,
            SIG_STACK_SIZE,
            libc::PROT_READ | libc::PROT_WRITE,
        ) == -1
        {
            let err = std::io::Error::last_os_error();
            libc::munmap(ptr, alloc_size);
            return Err(err.into());
        }

        let new_stack = libc::stack_t {
            ss_sp: stack_ptr,
            ss_flags: 0,
            ss_size: SIG_STACK_SIZE,
        };
        if libc::sigaltstack(&new_stack, ptr::null_mut()) == -1 {
            let err = std::io::Error::last_os_error();
            libc::munmap(ptr, alloc_size);
            return Err(err.into());
        }

        debug_print!("installed sigaltstack");
        Ok(())
    }
}

/// Restores the `SIGSEGV` handler back to its default, which terminates the
/// process once the signal is raised again
#[inline]
unsafe fn install_default_handler() {
    // Android L+ expose signal and sigaction symbols that override the system
    // ones. There is a bug in these functions where a request to set the handler
    // to SIG_DFL is ignored. In that case, an infinite loop is entered as the
    // signal is repeatedly sent to our handler.
    // To work around this, directly call the system's sigaction.
    unsafe {
        cfg_if::cfg_if! {
            if #[cfg(target_os = "android")] {
                let mut sa: libc::sigaction = mem::zeroed();
                libc::sigemptyset(&mut sa.sa_mask);
                sa.sa_sigaction = libc::SIG_DFL;
                sa.sa_flags = libc::SA_RESTART;
                libc::syscall(
                    libc::SYS_rt_sigaction,
                    libc::SIGSEGV,
                    &sa,
                    ptr::null::<libc::sigaction>(),
                    mem::size_of::<libc::sigset_t>(),
                );
            } else {
                libc::signal(libc::SIGSEGV, libc::SIG_DFL);
            }
        }
    }
}

#[inline]
fn handler_address() -> libc::sighandler_t {
    signal_handler as *const () as libc::sighandler_t
}

#[inline]
unsafe fn handler_action() -> libc::sigaction {
    unsafe {
        let mut sa: libc::sigaction = mem::zeroed();
        libc::sigemptyset(&mut sa.sa_mask);

        sa.sa_sigaction = handler_address();
        // SIGSEGV is not blocked while reporting, so that a fault in the
        // handler reaches the reentrancy check instead of killing the process
        sa.sa_flags = libc::SA_ONSTACK | libc::SA_SIGINFO | libc::SA_NODEFER;
        sa
    }
}

unsafe fn install_handler() -> Result<(), Error> {
    unsafe {
        let sa = handler_action();
        if libc::sigaction(libc::SIGSEGV, &sa, ptr::null_mut()) == -1 {
            return Err(std::io::Error::last_os_error().into());
        }
    }

    Ok(())
}

pub(super) fn attach(config: Config, sink: Box<dyn Sink>) -> Result<(), Error> {
    let mut lock = HANDLER.lock();

    if lock.as_ref().is_some_and(|inner| inner.attached) {
        return Err(Error::HandlerAlreadyInstalled);
    }

    let inner = HandlerInner::new(&config, sink)?;

    if config.alt_stack {
        // SAFETY: syscalls
        unsafe { install_sigaltstack()? };
    }

    // SAFETY: syscalls
    unsafe { install_handler()? };

    EXIT_CODE.store(config.exit_code, Ordering::Relaxed);
    *lock = Some(inner);

    STATE.store(HandlerState::Installed as u8, Ordering::SeqCst);

    log::debug!(
        "installed SIGSEGV handler, capturing up to {} frames",
        config.max_depth
    );

    Ok(())
}

/// Marks the handler as detached, it keeps reporting faults until another
/// handler is attached in its place
pub(super) fn detach() {
    if let Some(inner) = &mut *HANDLER.lock() {
        inner.attached = false;
    }
}

#[inline]
pub(super) fn current() -> HandlerState {
    HandlerState::from_u8(STATE.load(Ordering::SeqCst))
}

static HANDLER: parking_lot::Mutex<Option<HandlerInner>> = parking_lot::const_mutex(None);
static STATE: AtomicU8 = AtomicU8::new(HandlerState::Uninstalled as u8);
/// The thread that is reporting a fault, so that a fault while reporting can
/// be told apart from a fault on another thread
static HANDLING_THREAD: AtomicI32 = AtomicI32::new(0);
/// Kept outside of [`HANDLER`] so that it is available even if the lock
/// can't be taken
static EXIT_CODE: AtomicI32 = AtomicI32::new(0);

/// This is the actual function installed for `SIGSEGV`, invoked by the kernel
unsafe extern "C" fn signal_handler(
    sig: libc::c_int,
    info: *mut libc::siginfo_t,
    uc: *mut libc::c_void,
) {
    unsafe {
        // We might run inside a process where some other buggy code saves and
        // restores signal handlers temporarily with `signal` instead of `sigaction`.
        // This loses the `SA_SIGINFO` flag associated with this function. As a
        // consequence, the values of `info` and `uc` become totally bogus,
        // generally inducing a crash.
        //
        // The following code tries to detect this case. When it does, it
        // resets the signal handler with `sigaction` & `SA_SIGINFO` and returns.
        // This forces the signal to be thrown again, but this time the kernel
        // will call the function with the right arguments.
        {
            let mut cur_handler: libc::sigaction = mem::zeroed();
            if libc::sigaction(sig, ptr::null(), &mut cur_handler) == 0
                && cur_handler.sa_sigaction == handler_address()
                && cur_handler.sa_flags & libc::SA_SIGINFO == 0
            {
                let sa = handler_action();
                if libc::sigaction(sig, &sa, ptr::null_mut()) == -1 {
                    // When resetting the handler fails, try to reset the
                    // default one to avoid an infinite loop here.
                    install_default_handler();
                }

                // exit the handler as we should be called again soon
                return;
            }
        }

        let tid = libc::syscall(libc::SYS_gettid) as i32;

        if let Err(state) = STATE.compare_exchange(
            HandlerState::Installed as u8,
            HandlerState::Handling as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            match HandlerState::from_u8(state) {
                HandlerState::Uninstalled => {
                    // Nothing to report to, let the fault retrigger with the
                    // default action
                    install_default_handler();
                    return;
                }
                _ if HANDLING_THREAD.load(Ordering::SeqCst) == tid => {
                    debug_print!("faulted while reporting a fault");
                    libc::_exit(EXIT_CODE.load(Ordering::Relaxed));
                }
                _ => {
                    // Another thread is already reporting, and will exit the
                    // process once it is done
                    loop {
                        libc::pause();
                    }
                }
            }
        }

        HANDLING_THREAD.store(tid, Ordering::SeqCst);
        debug_print!("handling fault");

        let context = CrashContext::from_raw(sig, info, uc);

        // Never block here, if the lock is held the fault most likely
        // occurred during attach
        if let Some(handler) = HANDLER.try_lock() {
            if let Some(handler) = &*handler {
                handler.report(&context);
            }
        } else {
            debug_print!("handler locked, unable to report");
        }

        STATE.store(HandlerState::Terminated as u8, Ordering::SeqCst);
        debug_print!("exiting");

        libc::_exit(EXIT_CODE.load(Ordering::Relaxed));
    }
}

struct HandlerInner {
    resolver: ExternalResolver,
    sink: Box<dyn Sink>,
    max_depth: usize,
    demangle: bool,
    /// False once detached, allowing another attach to replace it
    attached: bool,
}

impl HandlerInner {
    fn new(config: &Config, sink: Box<dyn Sink>) -> Result<Self, Error> {
        Ok(Self {
            resolver: ExternalResolver::new(config)?,
            sink,
            max_depth: config.max_depth,
            demangle: config.demangle,
            attached: true,
        })
    }

    #[inline(never)]
    fn report(&self, context: &CrashContext) {
        let mut frames = Frames::capture(self.max_depth);
        debug_print!("captured frames");
        frames.substitute_instruction_pointer(context.instruction_pointer);

        let symbolizer = Dladdr {
            demangle: self.demangle,
        };

        report::emit(context, &frames, &symbolizer, &self.resolver, &*self.sink);
    }
}
