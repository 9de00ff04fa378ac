//! The boundary to a host process that loads the reporter as a plugin.
//!
//! The host hands over its global state and a function table when it attaches
//! the plugin. Neither is used by the reporter itself, but a host that passes
//! null for either is misbehaving, so attaching fails rather than installing a
//! handler into it.

use crate::{Config, Error, FaultReporter, Sink};
use std::{ffi::c_void, ptr::NonNull};

/// The pointers a host supplies when attaching
#[derive(Copy, Clone, Debug)]
pub struct HostContext {
    pub globals: Option<NonNull<c_void>>,
    pub function_table: Option<NonNull<c_void>>,
}

impl HostContext {
    #[inline]
    pub fn new(globals: *mut c_void, function_table: *mut c_void) -> Self {
        Self {
            globals: NonNull::new(globals),
            function_table: NonNull::new(function_table),
        }
    }

    /// Checks the host supplied everything it is required to
    pub fn validate(&self) -> Result<(), Error> {
        if self.globals.is_none() {
            return Err(Error::NullGlobals);
        }

        if self.function_table.is_none() {
            return Err(Error::NullFunctionTable);
        }

        Ok(())
    }
}

/// Attaches the reporter on behalf of a host.
///
/// If the host context is invalid the failure is written to the sink's error
/// channel and no handler is installed.
pub fn attach(host: HostContext, config: Config, sink: Box<dyn Sink>) -> Result<FaultReporter, Error> {
    if let Err(err) = host.validate() {
        sink.error(&err.to_string());
        return Err(err);
    }

    FaultReporter::attach(config, sink)
}

/// Detaches the reporter on behalf of a host, which always succeeds as the
/// handler stays installed for the remainder of the process
#[inline]
pub fn detach(reporter: Option<FaultReporter>) {
    if let Some(reporter) = reporter {
        reporter.detach();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct Errors(Arc<Mutex<Vec<String>>>);

    unsafe impl Sink for Errors {
        fn console(&self, _line: &str) {}

        fn error(&self, line: &str) {
            self.0.lock().push(line.to_owned());
        }
    }

    fn non_null() -> *mut c_void {
        NonNull::<u64>::dangling().as_ptr().cast()
    }

    #[test]
    fn null_globals() {
        let errors = Errors::default();
        let res = attach(
            HostContext::new(std::ptr::null_mut(), non_null()),
            Config::default(),
            Box::new(errors.clone()),
        );

        assert!(matches!(res, Err(Error::NullGlobals)));
        assert_eq!(
            *errors.0.lock(),
            vec!["attach called with null host globals".to_owned()]
        );
        assert_eq!(FaultReporter::state(), crate::HandlerState::Uninstalled);
    }

    #[test]
    fn null_function_table() {
        let errors = Errors::default();
        let res = attach(
            HostContext::new(non_null(), std::ptr::null_mut()),
            Config::default(),
            Box::new(errors.clone()),
        );

        assert!(matches!(res, Err(Error::NullFunctionTable)));
        assert_eq!(
            *errors.0.lock(),
            vec!["attach called with null function table".to_owned()]
        );
    }

    #[test]
    fn globals_are_checked_first() {
        let host = HostContext::new(std::ptr::null_mut(), std::ptr::null_mut());
        assert!(matches!(host.validate(), Err(Error::NullGlobals)));
        assert!(HostContext::new(non_null(), non_null()).validate().is_ok());
    }
}
