//! Host event-loop integration: the prepare/check/dispatch contract.
//!
//! The engine never owns a thread loop of its own. Instead it implements
//! [`LoopSource`], and whoever owns the process's OS-level wait (a GUI main
//! loop, or [`run_host_loop`] for headless use) folds the engine's timing
//! into its own `poll` call:
//!
//! - `prepare` says whether a cycle is due right now and, if not, the longest
//!   the host may sleep before asking again
//! - `check` says whether any of the source's file descriptors woke the poll
//! - `dispatch` performs one cycle
//!
//! This keeps one OS wait shared between the engine, device descriptors, and
//! unrelated subsystems, instead of threads fighting over wake-up latency.

use std::time::Duration;

use crate::Result;

/// One file descriptor a source wants included in the host's poll set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollFd {
    /// Raw descriptor value.
    pub fd: i32,
    /// Requested event mask, `poll(2)` semantics.
    pub events: i16,
    /// Events the host observed, filled before `check`.
    pub revents: i16,
}

/// A participant in a host event loop.
pub trait LoopSource {
    /// Reports whether dispatch is due immediately. When it is not, `timeout`
    /// receives the longest the host may wait; `None` means no deadline.
    fn prepare(&mut self, timeout: &mut Option<Duration>) -> bool;

    /// Inspects the polled descriptors and reports whether dispatch is due.
    fn check(&mut self, fds: &[PollFd]) -> bool;

    /// Performs one cycle of work.
    fn dispatch(&mut self) -> Result<()>;

    /// Descriptors the host should include in its wait. Sources driven
    /// purely by timeout return none.
    fn poll_fds(&self) -> Vec<PollFd> {
        Vec::new()
    }
}

/// Longest single sleep, so a stuck timeout never wedges the loop.
const MAX_SLEEP: Duration = Duration::from_millis(100);

/// Minimal headless host loop: drives `source` until `done` returns true.
///
/// Stands in for a real main loop when the process has nothing else to wait
/// on. Descriptor-based wakeups degrade to timeout polling here; a real host
/// would pass `poll_fds` to its OS wait and hand the results to `check`.
pub fn run_host_loop(source: &mut dyn LoopSource, mut done: impl FnMut() -> bool) -> Result<()> {
    while !done() {
        let mut timeout = None;
        let due = source.prepare(&mut timeout);
        if due || source.check(&[]) {
            source.dispatch()?;
            continue;
        }
        match timeout {
            Some(t) if t > Duration::ZERO => std::thread::sleep(t.min(MAX_SLEEP)),
            Some(_) => {}
            None => std::thread::sleep(MAX_SLEEP),
        }
    }
    Ok(())
}
