// Mon Feb 2 2026 - Alex

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// How one timed call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Completed,
    TimedOut,
    Faulted,
}

impl TerminalState {
    /// Integer form for logsheet fields.
    pub fn code(self) -> u8 {
        match self {
            TerminalState::Completed => 0,
            TerminalState::TimedOut => 1,
            TerminalState::Faulted => 2,
        }
    }
}

/// Outcome of one call through [`TimedInvoker`].
///
/// `output` is present only for `Completed`; a timed-out operation's side
/// effects are untrustworthy, and a faulted one produced nothing.
#[derive(Debug)]
pub struct InvocationResult<T> {
    pub elapsed: Duration,
    pub state: TerminalState,
    pub output: Option<T>,
}

impl<T> InvocationResult<T> {
    pub fn completed(&self) -> bool {
        self.state == TerminalState::Completed
    }
}

/// Runs one operation as an isolated unit under a deadline.
///
/// Each call gets a fresh thread and channel, so concurrent invocations
/// share no state. A deadline miss abandons the operation logically; the
/// thread is detached, never killed, and an uncooperative operation keeps
/// its owning process alive past the deadline.
#[derive(Debug, Clone, Copy)]
pub struct TimedInvoker {
    deadline: Duration,
}

impl TimedInvoker {
    pub fn new(deadline: Duration) -> Self {
        Self { deadline }
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn invoke<T, F>(&self, operation: F) -> InvocationResult<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel();
        let start = Instant::now();

        let spawned = thread::Builder::new()
            .name("timed-call".to_string())
            .spawn(move || {
                // A panic drops the sender unsent; the receiver sees it as a fault
                let _ = sender.send(operation());
            });

        if spawned.is_err() {
            return InvocationResult {
                elapsed: start.elapsed(),
                state: TerminalState::Faulted,
                output: None,
            };
        }

        match receiver.recv_timeout(self.deadline) {
            Ok(output) => InvocationResult {
                elapsed: start.elapsed(),
                state: TerminalState::Completed,
                output: Some(output),
            },
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::warn!("call exceeded its {:?} budget, abandoning", self.deadline);
                InvocationResult {
                    elapsed: start.elapsed(),
                    state: TerminalState::TimedOut,
                    output: None,
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => InvocationResult {
                elapsed: start.elapsed(),
                state: TerminalState::Faulted,
                output: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_returns_output() {
        let invoker = TimedInvoker::new(Duration::from_secs(5));
        let result = invoker.invoke(|| 41 + 1);

        assert_eq!(result.state, TerminalState::Completed);
        assert_eq!(result.output, Some(42));
    }

    #[test]
    fn test_timeout_when_operation_outlives_deadline() {
        let invoker = TimedInvoker::new(Duration::from_millis(50));
        let result = invoker.invoke(|| {
            thread::sleep(Duration::from_millis(500));
            0
        });

        assert_eq!(result.state, TerminalState::TimedOut);
        assert!(result.output.is_none());
        assert!(result.elapsed >= Duration::from_millis(50));
        assert!(result.elapsed < Duration::from_millis(450));
    }

    #[test]
    fn test_panic_reports_faulted() {
        let invoker = TimedInvoker::new(Duration::from_secs(5));
        let result: InvocationResult<i32> = invoker.invoke(|| panic!("boom"));

        assert_eq!(result.state, TerminalState::Faulted);
        assert!(result.output.is_none());
    }

    #[test]
    fn test_state_codes() {
        assert_eq!(TerminalState::Completed.code(), 0);
        assert_eq!(TerminalState::TimedOut.code(), 1);
        assert_eq!(TerminalState::Faulted.code(), 2);
    }
}
