mod state;

use crate::{Config, Error, Sink};

/// Where the handler is in its lifecycle
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum HandlerState {
    /// No handler has been attached
    Uninstalled = 0,
    /// The handler is waiting for a fault
    Installed = 1,
    /// A fault is being reported
    Handling = 2,
    /// The report has been written and the process is exiting
    Terminated = 3,
}

impl HandlerState {
    #[inline]
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Installed,
            2 => Self::Handling,
            3 => Self::Terminated,
            _ => Self::Uninstalled,
        }
    }
}

/// A Linux/Android `SIGSEGV` handler
pub struct FaultReporter;

#[allow(clippy::unused_self)]
impl FaultReporter {
    /// Attaches the signal handler.
    ///
    /// Everything the handler needs, the resolver tool path and the sink, is
    /// prepared here, so that as little as possible needs to be done once a
    /// fault occurs. When a fault is caught the report is written to `sink`
    /// and the process exits with [`Config::exit_code`].
    ///
    /// Only one handler can be attached at a time, attaching again fails with
    /// [`Error::HandlerAlreadyInstalled`] until the current one is detached.
    pub fn attach(config: Config, sink: Box<dyn Sink>) -> Result<Self, Error> {
        state::attach(config, sink)?;
        Ok(Self)
    }

    /// Detaches the handler.
    ///
    /// Note that this does _not_ restore the previous `SIGSEGV` disposition,
    /// the handler stays in place and keeps reporting with the detached
    /// config and sink until the process exits, or until [`Self::attach`] is
    /// called again, which replaces them.
    #[inline]
    pub fn detach(self) {
        state::detach();
        log::debug!("detaching fault reporter, SIGSEGV handler stays installed");
    }

    /// Installs an alternate signal stack on the calling thread, if it doesn't
    /// already have one large enough, so that a fault on it, including a stack
    /// overflow, can be reported.
    ///
    /// [`Self::attach`] does this for the attaching thread when
    /// [`Config::alt_stack`] is set, other threads must call this themselves.
    /// Note that the stack is never unmapped, even when the thread exits.
    #[inline]
    pub fn prepare_thread() -> Result<(), Error> {
        // SAFETY: syscalls
        unsafe { state::install_sigaltstack() }
    }

    /// The current state of the handler
    #[inline]
    pub fn state() -> HandlerState {
        state::current()
    }
}
