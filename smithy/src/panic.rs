use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::fmt;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::error;

use crate::context::RunContext;

/// Policy deciding what a panic inside component code turns into.
///
/// Returns the error to surface (if any) and whether the panic is fatal. The
/// runner maps the pair onto its result:
///
/// | error     | fatal | runner result                     |
/// |-----------|-------|-----------------------------------|
/// | any       | true  | `ComponentError::Panic`           |
/// | `Some(e)` | false | `ComponentError::PanicRecovered`  |
/// | `None`    | false | success                           |
pub trait PanicHandler: Send + Sync + fmt::Debug {
    fn handle_panic(
        &self,
        ctx: &RunContext,
        payload: Option<Box<dyn Any + Send>>,
    ) -> (Option<anyhow::Error>, bool);
}

/// Logs the panic with its backtrace and treats every panic as fatal.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultPanicHandler;

impl PanicHandler for DefaultPanicHandler {
    fn handle_panic(
        &self,
        ctx: &RunContext,
        payload: Option<Box<dyn Any + Send>>,
    ) -> (Option<anyhow::Error>, bool) {
        let Some(payload) = payload else {
            return (None, false);
        };

        let _entered = ctx.span().enter();
        match payload_to_error(payload) {
            Some(err) => {
                let trace = take_backtrace().unwrap_or_default();
                error!(
                    panic_stack_trace = %trace,
                    error = %format!("{err:#}"),
                    "recovered from panic in component"
                );
                (Some(err), true)
            }
            None => {
                error!("recovered from panic with a non-error payload");
                (None, true)
            }
        }
    }
}

/// Converts the payloads `panic!` and `std::panic::panic_any` commonly carry.
pub fn payload_to_error(payload: Box<dyn Any + Send>) -> Option<anyhow::Error> {
    let payload = match payload.downcast::<&'static str>() {
        Ok(msg) => return Some(anyhow::Error::msg(*msg)),
        Err(other) => other,
    };
    let payload = match payload.downcast::<String>() {
        Ok(msg) => return Some(anyhow::Error::msg(*msg)),
        Err(other) => other,
    };
    let payload = match payload.downcast::<anyhow::Error>() {
        Ok(err) => return Some(*err),
        Err(other) => other,
    };
    match payload.downcast::<Box<dyn std::error::Error + Send + Sync>>() {
        Ok(err) => Some(anyhow::Error::msg(*err)),
        Err(_) => None,
    }
}

thread_local! {
    static LAST_BACKTRACE: RefCell<Option<String>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();
static GUARDED_RUNS: AtomicUsize = AtomicUsize::new(0);

/// Installs the process panic hook that records the panic-site backtrace.
///
/// While a guarded run is active the default hook output is suppressed so
/// stderr stays JSON-only; outside of runs the previous hook still fires.
pub(crate) fn install_hook() {
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let trace = format!("{info}\n{}", Backtrace::force_capture());
            LAST_BACKTRACE.with(|slot| *slot.borrow_mut() = Some(trace));
            if GUARDED_RUNS.load(Ordering::SeqCst) == 0 {
                previous(info);
            }
        }));
    });
}

/// Backtrace of the most recent panic on this thread, if not yet taken.
pub fn take_backtrace() -> Option<String> {
    LAST_BACKTRACE.with(|slot| slot.borrow_mut().take())
}

/// Marks a guarded region for the lifetime of the value.
pub(crate) struct GuardedRun(());

impl GuardedRun {
    pub(crate) fn enter() -> Self {
        install_hook();
        GUARDED_RUNS.fetch_add(1, Ordering::SeqCst);
        Self(())
    }
}

impl Drop for GuardedRun {
    fn drop(&mut self) {
        GUARDED_RUNS.fetch_sub(1, Ordering::SeqCst);
    }
}
