//! Cancellation and unit cleanup for a running synchronization.
//!
//! Only the root [`Controller`] listens for signals. It owns the fan-out of
//! descent units: on a signal it cancels them cooperatively, waits out the
//! grace period, then aborts whatever is still alive. Units themselves only
//! observe the cancellation token and flush their own log output.

pub mod supervisor;

use std::future::Future;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

pub use supervisor::{join_unit, Supervisor};

/// Default wait for cooperative shutdown before units are aborted
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    CancelRequested,
    Draining,
    Terminated,
}

/// Terminating signals handled by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl Signal {
    pub fn number(&self) -> i32 {
        #[cfg(unix)]
        {
            match self {
                Self::Interrupt => libc::SIGINT,
                Self::Terminate => libc::SIGTERM,
            }
        }
        #[cfg(not(unix))]
        {
            match self {
                Self::Interrupt => 2,
                Self::Terminate => 15,
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Interrupt => "SIGINT",
            Self::Terminate => "SIGTERM",
        }
    }

    /// Process exit code: 128 + signal number
    pub fn exit_code(&self) -> i32 {
        128 + self.number()
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name(), self.number())
    }
}

/// Signal handlers, installed once for the process.
///
/// Once installed, the default disposition no longer applies, so a second
/// delivery during cleanup does not kill the process.
pub struct SignalListener {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl SignalListener {
    /// Must be called from within a tokio runtime
    pub fn install() -> std::io::Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            Ok(Self {
                interrupt: signal(SignalKind::interrupt())?,
                terminate: signal(SignalKind::terminate())?,
            })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    pub async fn recv(&mut self) -> Signal {
        #[cfg(unix)]
        {
            tokio::select! {
                Some(_) = self.interrupt.recv() => Signal::Interrupt,
                Some(_) = self.terminate.recv() => Signal::Terminate,
                else => std::future::pending().await,
            }
        }
        #[cfg(not(unix))]
        {
            match tokio::signal::ctrl_c().await {
                Ok(()) => Signal::Interrupt,
                Err(_) => std::future::pending().await,
            }
        }
    }
}

/// What cleanup achieved after a cancellation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainOutcome {
    /// Units alive when cancellation started
    pub pending: usize,
    /// Units still alive after the grace period, aborted
    pub forced: Vec<PathBuf>,
}

impl DrainOutcome {
    pub fn graceful(&self) -> bool {
        self.forced.is_empty()
    }
}

/// How a supervised run ended
#[derive(Debug)]
pub enum Completion<T> {
    Finished(T),
    Interrupted { signal: Signal, drain: DrainOutcome },
}

/// Root-scope lifecycle controller.
pub struct Controller {
    state: Mutex<LifecycleState>,
    supervisor: Supervisor,
    grace_period: Duration,
}

impl Controller {
    pub fn new(supervisor: Supervisor, grace_period: Duration) -> Self {
        Self {
            state: Mutex::new(LifecycleState::Running),
            supervisor,
            grace_period,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.lock_state()
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// `Running` → `CancelRequested`. Any later request is ignored and
    /// returns false.
    pub fn request_cancel(&self, signal: Signal) -> bool {
        let mut state = self.lock_state();
        if *state != LifecycleState::Running {
            tracing::debug!("Ignoring {}: cleanup already started", signal);
            return false;
        }
        *state = LifecycleState::CancelRequested;
        tracing::warn!("Signal {} received: starting cleanup of descent units", signal);
        true
    }

    /// Cancel every live unit, wait out the grace period, abort stragglers.
    pub async fn drain(&self) -> DrainOutcome {
        let pending = self.supervisor.active_units();
        for path in &pending {
            tracing::info!("Ending unit: {}", path.display());
        }
        self.supervisor.cancel();
        self.set_state(LifecycleState::Draining);

        let forced = if self.supervisor.wait_idle(self.grace_period).await {
            Vec::new()
        } else {
            self.supervisor.abort_all()
        };
        for path in &forced {
            tracing::warn!("Forcing closure of unresponsive unit: {}", path.display());
        }

        DrainOutcome {
            pending: pending.len(),
            forced,
        }
    }

    pub fn terminate(&self) {
        self.set_state(LifecycleState::Terminated);
    }

    /// Drive `work` to completion unless `signal` fires first, in which case
    /// the run is drained and reported as interrupted.
    pub async fn supervise<T, W, S>(&self, work: W, signal: S) -> Completion<T>
    where
        W: Future<Output = T>,
        S: Future<Output = Signal>,
    {
        tokio::pin!(work);
        tokio::pin!(signal);

        let completion = tokio::select! {
            biased;
            signal = &mut signal => {
                self.request_cancel(signal);
                let drain = self.drain().await;
                Completion::Interrupted { signal, drain }
            }
            output = &mut work => Completion::Finished(output),
        };

        self.terminate();
        completion
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: LifecycleState) {
        *self.lock_state() = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_exit_codes() {
        assert_eq!(Signal::Interrupt.exit_code(), 130);
        assert_eq!(Signal::Terminate.exit_code(), 143);
        assert_eq!(Signal::Terminate.to_string(), "SIGTERM (15)");
    }

    #[test]
    fn test_request_cancel_only_once() {
        let controller = Controller::new(Supervisor::new(2), Duration::from_millis(10));
        assert_eq!(controller.state(), LifecycleState::Running);

        assert!(controller.request_cancel(Signal::Terminate));
        assert_eq!(controller.state(), LifecycleState::CancelRequested);
        assert!(!controller.request_cancel(Signal::Interrupt));
        assert_eq!(controller.state(), LifecycleState::CancelRequested);
    }

    #[tokio::test]
    async fn test_drain_graceful() {
        let supervisor = Supervisor::new(2);
        let controller = Controller::new(supervisor.clone(), Duration::from_secs(5));
        let token = supervisor.token();
        supervisor.spawn_unit(PathBuf::from("/cooperative"), async move {
            token.cancelled().await;
        });

        controller.request_cancel(Signal::Interrupt);
        let outcome = controller.drain().await;

        assert_eq!(outcome.pending, 1);
        assert!(outcome.graceful());
        assert_eq!(controller.state(), LifecycleState::Draining);
        assert_eq!(supervisor.active_count(), 0);
    }

    #[tokio::test]
    async fn test_drain_forces_unresponsive_units() {
        let supervisor = Supervisor::new(2);
        let controller = Controller::new(supervisor.clone(), Duration::from_millis(50));
        let handle = supervisor.spawn_unit(PathBuf::from("/hung"), async {
            std::future::pending::<()>().await;
        });

        controller.request_cancel(Signal::Terminate);
        let outcome = controller.drain().await;

        assert_eq!(outcome.forced, vec![PathBuf::from("/hung")]);
        assert!(handle.await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn test_supervise_finished() {
        let controller = Controller::new(Supervisor::new(1), DEFAULT_GRACE_PERIOD);
        let completion = controller
            .supervise(async { 42 }, std::future::pending::<Signal>())
            .await;

        assert!(matches!(completion, Completion::Finished(42)));
        assert_eq!(controller.state(), LifecycleState::Terminated);
    }

    #[tokio::test]
    async fn test_supervise_interrupted() {
        let supervisor = Supervisor::new(1);
        let controller = Controller::new(supervisor.clone(), Duration::from_millis(100));
        let token = supervisor.token();
        let work = supervisor.spawn_unit(PathBuf::from("/root"), async move {
            token.cancelled().await;
        });

        let completion = controller
            .supervise(work, async { Signal::Terminate })
            .await;

        match completion {
            Completion::Interrupted { signal, drain } => {
                assert_eq!(signal.exit_code(), 143);
                assert!(drain.graceful());
            }
            Completion::Finished(_) => panic!("expected interruption"),
        }
        assert_eq!(controller.state(), LifecycleState::Terminated);
        assert!(supervisor.is_cancelled());
    }
}
