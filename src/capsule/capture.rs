// src/capsule/capture.rs

//! Turning a live failure (an `anyhow::Error` or a panic) into a
//! [`FailureCapsule`].
//!
//! Capture never fails: when no backtrace is available the capsule simply
//! carries an empty frame list.

use std::any::Any;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use super::FailureCapsule;
use super::frame::{Frame, parse_backtrace};
use super::kinds::{KindRegistry, RemoteKind, WorkerPanic};

struct PanicSite {
    location: Option<Frame>,
    backtrace: String,
}

thread_local! {
    static LAST_PANIC: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Install a process-wide panic hook that remembers where the most recent
/// panic on each thread happened. The previously installed hook still runs.
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let location = info
                .location()
                .map(|loc| Frame::new(loc.file(), loc.line()));
            let backtrace = Backtrace::force_capture().to_string();
            LAST_PANIC.with(|slot| {
                *slot.borrow_mut() = Some(PanicSite {
                    location,
                    backtrace,
                });
            });
            previous(info);
        }));
    });
}

/// Capture an error returned by a worker hook.
pub fn capture_error(kinds: &KindRegistry, err: &anyhow::Error) -> FailureCapsule {
    let (kind, message) = kinds.classify(err);
    let backtrace = err.backtrace();
    let frames = match backtrace.status() {
        BacktraceStatus::Captured => parse_backtrace(&backtrace.to_string()),
        _ => Vec::new(),
    };
    FailureCapsule::new(kind, message, frames)
}

/// Capture a panic payload caught with `catch_unwind` on this thread.
pub fn capture_panic(payload: Box<dyn Any + Send>) -> FailureCapsule {
    let message = panic_message(payload.as_ref());
    let site = LAST_PANIC.with(|slot| slot.borrow_mut().take());

    let frames = match site {
        Some(site) => {
            let mut frames = parse_backtrace(&site.backtrace);
            if let Some(location) = site.location {
                let known = frames.last().is_some_and(|f| {
                    f.line == location.line
                        && (f.location.ends_with(&location.location)
                            || location.location.ends_with(&f.location))
                });
                if !known {
                    frames.push(location);
                }
            }
            frames
        }
        None => Vec::new(),
    };

    FailureCapsule::new(WorkerPanic::KIND, message, frames)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// Run `f`, turning an error or a panic into a capsule.
pub fn guard<T>(
    kinds: &KindRegistry,
    f: impl FnOnce() -> anyhow::Result<T>,
) -> Result<T, FailureCapsule> {
    install_panic_hook();
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(capture_error(kinds, &err)),
        Err(payload) => Err(capture_panic(payload)),
    }
}

/// Run `f` and keep only its failure, if any.
pub fn capture_any(
    kinds: &KindRegistry,
    f: impl FnOnce() -> anyhow::Result<()>,
) -> Option<FailureCapsule> {
    guard(kinds, f).err()
}
