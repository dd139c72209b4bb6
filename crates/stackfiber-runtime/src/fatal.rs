//! Process abort for unrecoverable fiber errors

use stackfiber_core::error::FiberError;
use stackfiber_core::kerror;

/// Log `err` and abort the process
///
/// Used when a machine context or a fiber's state can no longer be
/// trusted. Unwinding is not an option: a panic raised here could cross
/// a context switch boundary.
#[cold]
#[inline(never)]
pub fn fatal(err: FiberError) -> ! {
    kerror!("fatal: {}", err);
    std::process::abort()
}

/// Unwrap a result, aborting on error
#[inline]
pub(crate) fn or_fatal<T>(result: Result<T, FiberError>) -> T {
    result.unwrap_or_else(|e| fatal(e))
}
