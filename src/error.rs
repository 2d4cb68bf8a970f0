//! The map's narrow error surface.
//!
//! Every condition that can arise during normal operation is benign: a
//! missing key, a losing CAS race, a load-factor trip. None of those are
//! errors in the Rust sense — they're reported back through plain booleans
//! and `Option`s, never a `Result`. The one exception is self-consistency
//! corruption (e.g. a search terminating with no left neighbor when the
//! algorithm guarantees one exists): that can only mean memory corruption,
//! and the only sound response is to stop the process rather than keep
//! running on a structure that no longer holds its invariants.
use log::error;

/// Logs and aborts the process. Never returns.
///
/// Called only at points where the split-ordered list's own invariants
/// guarantee a condition that, if false, means the structure is corrupted —
/// not a place reachable by a benign CAS race.
#[cold]
pub(crate) fn abort_corrupted(msg: &str) -> ! {
    error!("split-ordered-map: invariant violated, aborting: {msg}");
    std::process::abort()
}
