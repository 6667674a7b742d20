//! Exit classification for worker processes.
//!
//! Only used to explain a lost process worker in the logs; the scheduler
//! treats every loss the same way.

use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use std::fmt;

/// Why a worker process went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    /// Normal exit with status code.
    Exited(i32),
    /// Killed by SIGKILL, usually the OOM killer or an operator.
    Killed,
    /// Crashed with a fault signal (SIGSEGV, SIGBUS, SIGFPE, SIGILL, SIGABRT).
    Crashed(Signal),
    /// Terminated by any other signal.
    Signaled(Signal),
    StillAlive,
    Unknown,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with code {}", code),
            Self::Killed => write!(f, "killed (SIGKILL)"),
            Self::Crashed(sig) => write!(f, "crashed with {:?}", sig),
            Self::Signaled(sig) => write!(f, "terminated by {:?}", sig),
            Self::StillAlive => write!(f, "still running"),
            Self::Unknown => write!(f, "unknown reason"),
        }
    }
}

/// Classify a `WaitStatus`.
pub fn analyze_wait_status(status: WaitStatus) -> TerminationReason {
    match status {
        WaitStatus::Exited(_, code) => TerminationReason::Exited(code),
        WaitStatus::Signaled(_, Signal::SIGKILL, _) => TerminationReason::Killed,
        WaitStatus::Signaled(
            _,
            sig @ (Signal::SIGSEGV | Signal::SIGBUS | Signal::SIGFPE | Signal::SIGILL | Signal::SIGABRT),
            _,
        ) => TerminationReason::Crashed(sig),
        WaitStatus::Signaled(_, sig, _) => TerminationReason::Signaled(sig),
        WaitStatus::StillAlive => TerminationReason::StillAlive,
        _ => TerminationReason::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::Pid;

    #[test]
    fn test_analyze_exit() {
        let status = WaitStatus::Exited(Pid::from_raw(1), 0);
        assert_eq!(analyze_wait_status(status), TerminationReason::Exited(0));

        let status = WaitStatus::Exited(Pid::from_raw(1), 3);
        assert_eq!(analyze_wait_status(status), TerminationReason::Exited(3));
    }

    #[test]
    fn test_analyze_signals() {
        let pid = Pid::from_raw(1);
        assert_eq!(
            analyze_wait_status(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            TerminationReason::Killed
        );
        assert_eq!(
            analyze_wait_status(WaitStatus::Signaled(pid, Signal::SIGSEGV, true)),
            TerminationReason::Crashed(Signal::SIGSEGV)
        );
        assert_eq!(
            analyze_wait_status(WaitStatus::Signaled(pid, Signal::SIGTERM, false)),
            TerminationReason::Signaled(Signal::SIGTERM)
        );
        assert_eq!(
            analyze_wait_status(WaitStatus::StillAlive),
            TerminationReason::StillAlive
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(TerminationReason::Exited(2).to_string(), "exited with code 2");
        assert!(
            TerminationReason::Crashed(Signal::SIGBUS)
                .to_string()
                .contains("SIGBUS")
        );
    }
}
