//! Process lifecycle orchestration
//!
//! Subsystems register a start delegate (long-lived, runs until the process
//! token is cancelled) and a stop delegate (bounded by the shutdown
//! deadline). Start delegates run concurrently under one
//! [`CancellationToken`]; stop delegates run concurrently in a `JoinSet`
//! that is abandoned once the deadline passes.
//!
//! Fatal delegate errors are not handled here. They are forwarded to the
//! error channel returned by [`Lifecycle::new`] and the owner of the
//! process decides what to do.

use crate::error::{Error, Result};
use crate::logging::Logger;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Long-lived task started by [`Lifecycle::run`]
pub type StartDelegate =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<()>> + Send>;

/// Cleanup task run by [`Lifecycle::shutdown`]; receives the absolute deadline
pub type StopDelegate = Box<dyn FnOnce(Instant) -> BoxFuture<'static, ()> + Send>;

/// Start/stop delegate registry
pub struct Lifecycle {
    token: CancellationToken,
    starts: Vec<(&'static str, StartDelegate)>,
    stops: Vec<(&'static str, StopDelegate)>,
    running: JoinSet<()>,
    errors: mpsc::Sender<Error>,
    stopped: bool,
    log: Logger,
}

impl Lifecycle {
    /// Create an empty lifecycle and the receiving end of its error channel.
    ///
    /// Only the first fatal error is kept; later ones are logged and dropped.
    pub fn new(log: Logger) -> (Self, mpsc::Receiver<Error>) {
        let (errors, rx) = mpsc::channel(1);
        let lifecycle = Self {
            token: CancellationToken::new(),
            starts: Vec::new(),
            stops: Vec::new(),
            running: JoinSet::new(),
            errors,
            stopped: false,
            log,
        };
        (lifecycle, rx)
    }

    /// Process-lifetime cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Sender half of the fatal error channel.
    pub fn error_sender(&self) -> mpsc::Sender<Error> {
        self.errors.clone()
    }

    /// Register a start delegate. Delegates start in registration order.
    pub fn add_start_delegate<F, Fut>(&mut self, name: &'static str, start: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.starts
            .push((name, Box::new(move |token| start(token).boxed())));
    }

    /// Register a stop delegate. Stop delegates run concurrently.
    pub fn add_stop_delegate<F, Fut>(&mut self, name: &'static str, stop: F)
    where
        F: FnOnce(Instant) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.stops
            .push((name, Box::new(move |deadline| stop(deadline).boxed())));
    }

    /// Spawn every registered start delegate and return immediately.
    pub fn run(&mut self) {
        for (name, start) in self.starts.drain(..) {
            let token = self.token.clone();
            let errors = self.errors.clone();
            let log = self.log.clone();
            self.running.spawn(async move {
                log.debug(format_args!("Starting {}", name));
                match start(token).await {
                    Ok(()) => log.debug(format_args!("{} finished", name)),
                    Err(e) => {
                        log.error(format_args!("{} failed: {}", name, e));
                        if let Err(mpsc::error::TrySendError::Full(e)) = errors.try_send(e) {
                            log.debug(format_args!("Dropping secondary failure: {}", e));
                        }
                    }
                }
            });
        }
    }

    /// Cancel the process token and run every stop delegate within `timeout`.
    ///
    /// Returns [`Error::ShutdownTimeout`] when a stop delegate is still
    /// running at the deadline. Start delegates that outlive the stop phase
    /// are aborted at the deadline. Calling this twice is a no-op.
    pub async fn shutdown(&mut self, timeout: Duration) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        // Delegates that never started are dropped along with their captures
        self.starts.clear();

        self.log.info("Shutting down");
        self.token.cancel();
        let deadline = Instant::now() + timeout;

        let mut stops = JoinSet::new();
        for (name, stop) in self.stops.drain(..) {
            let log = self.log.clone();
            stops.spawn(async move {
                log.debug(format_args!("Stopping {}", name));
                stop(deadline).await;
                log.debug(format_args!("{} stopped", name));
            });
        }

        let log = &self.log;
        let stopped = tokio::time::timeout_at(deadline, async {
            while let Some(joined) = stops.join_next().await {
                if let Err(e) = joined {
                    log.error(format_args!("Stop delegate panicked: {}", e));
                }
            }
        })
        .await;

        if stopped.is_err() {
            stops.abort_all();
            self.running.abort_all();
            self.log
                .error(format_args!("Shutdown did not finish within {:?}", timeout));
            return Err(Error::ShutdownTimeout(timeout));
        }

        let running = &mut self.running;
        let drained = tokio::time::timeout_at(deadline, async {
            while running.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            self.log.warn("Aborting start delegates still running at the deadline");
            self.running.abort_all();
        }

        self.log.info("Good bye!");
        Ok(())
    }
}
