use std::{fmt::Display, thread, time::Duration};

use anyhow::Result;
use log::{error, info, warn};

/// Outcome of a single receive cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    /// the listener finished cleanly and should not be restarted
    Stop,
}

/// A long-lived event source kept alive by the [`Supervisor`].
pub trait Listener {
    /// (re)establishes the session with the remote end
    fn start(&mut self) -> Result<()>;

    /// receives and handles one batch of events
    fn poll(&mut self) -> Result<Control>;
}

pub trait Sleeper {
    fn sleep(&mut self, duration: Duration);
}

pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&mut self, duration: Duration) {
        thread::sleep(duration)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        BackoffPolicy {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    /// min(initial * 2^attempt, max)
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Starting,
    Running,
    Failed,
    Backoff,
}

impl Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::Starting => write!(f, "starting"),
            State::Running => write!(f, "running"),
            State::Failed => write!(f, "failed"),
            State::Backoff => write!(f, "backoff"),
        }
    }
}

/// Restarts a [`Listener`] with exponential backoff whenever it fails.
///
/// Every error coming out of the listener is treated as retryable. The attempt
/// counter goes back to zero once a poll succeeds after a (re)start.
pub struct Supervisor<L: Listener, S: Sleeper> {
    listener: L,
    sleeper: S,
    policy: BackoffPolicy,
    state: State,
    attempt: u32,
}

impl<L: Listener> Supervisor<L, ThreadSleeper> {
    pub fn new(listener: L, policy: BackoffPolicy) -> Self {
        Supervisor::with_sleeper(listener, policy, ThreadSleeper)
    }
}

impl<L: Listener, S: Sleeper> Supervisor<L, S> {
    pub fn with_sleeper(listener: L, policy: BackoffPolicy, sleeper: S) -> Self {
        Supervisor {
            listener,
            sleeper,
            policy,
            state: State::Starting,
            attempt: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    #[cfg(test)]
    fn listener(&self) -> &L {
        &self.listener
    }

    /// drives the listener until it stops cleanly. Only returns on a clean stop.
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.transition(State::Starting);
            if let Err(err) = self.listener.start() {
                self.fail(err);
                continue;
            }

            self.transition(State::Running);
            if self.serve() == Control::Stop {
                info!("listener stopped, leaving supervisor");
                return Ok(());
            }
        }
    }

    /// polls until the listener stops or fails. Failures are handled here and
    /// reported as `Continue` so that `run` restarts the listener.
    fn serve(&mut self) -> Control {
        let mut first_poll = true;
        loop {
            match self.listener.poll() {
                Ok(control) => {
                    if first_poll {
                        first_poll = false;
                        if self.attempt > 0 {
                            info!("connection healthy again after {} attempt(s)", self.attempt);
                        }
                        self.attempt = 0;
                    }
                    if control == Control::Stop {
                        return Control::Stop;
                    }
                }
                Err(err) => {
                    self.fail(err);
                    return Control::Continue;
                }
            }
        }
    }

    fn fail(&mut self, err: anyhow::Error) {
        self.transition(State::Failed);
        error!("listener failed: {:#}", err);

        self.transition(State::Backoff);
        let delay = self.policy.delay(self.attempt);
        warn!(
            "retrying in {:?} (attempt {})",
            delay,
            self.attempt.saturating_add(1)
        );
        self.sleeper.sleep(delay);
        self.attempt = self.attempt.saturating_add(1);
    }

    fn transition(&mut self, next: State) {
        log::debug!("supervisor: {} -> {}", self.state, next);
        self.state = next;
    }
}
