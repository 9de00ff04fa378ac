/// An error that can occur when attaching a [`crate::FaultReporter`]
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The host didn't supply its global state
    #[error("attach called with null host globals")]
    NullGlobals,
    /// The host didn't supply a function table to fill in
    #[error("attach called with null function table")]
    NullFunctionTable,
    /// Unable to `mmap` memory for the alternate signal stack
    #[error("unable to allocate memory")]
    OutOfMemory,
    /// For simplicity sake, only one [`crate::FaultReporter`] can be
    /// registered at any one time.
    #[error("a fault handler is already installed")]
    HandlerAlreadyInstalled,
    /// The resolver tool path can't be passed to `execv`
    #[error("the resolver path contains a nul byte")]
    InvalidResolver(#[from] std::ffi::NulError),
    /// An I/O or other syscall failed
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
