use crate::Gate;
use crate::gate::Latch;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use scopeguard::defer;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

type Routine = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Runs a list of named async shutdown routines exactly once, when the
/// process receives a termination signal or when [triggered](Self::trigger)
/// manually.
///
/// The routines run one after another, in registration order, within a shared
/// timeout. A panicking routine is reported and does not stop the ones after
/// it. Routines registered while the others run are picked up as well. Once
/// the run ends (completed or timed out), every [`Gate`] of this hook opens.
///
/// Cheap to clone: all clones share the same routines.
#[derive(Clone)]
pub struct ShutdownHook {
    inner: Arc<Inner>,
}

struct Inner {
    routines: Mutex<Vec<(Arc<str>, Routine)>>,
    timeout: Duration,
    triggered: AtomicBool,
    listening: AtomicBool,
    latch: Latch,
}

impl ShutdownHook {
    /// Creates a hook that gives its routines 30 seconds in total.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    /// Creates a hook that gives its routines the given time in total.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                routines: Mutex::new(Vec::new()),
                timeout,
                triggered: AtomicBool::new(false),
                listening: AtomicBool::new(false),
                latch: Latch::default(),
            }),
        }
    }

    /// Adds a routine to run at shutdown.
    ///
    /// A routine registered after the run has finished never runs.
    pub fn register<F, Fut>(&self, name: impl AsRef<str>, routine: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.as_ref();

        if self.inner.latch.gate().is_open() {
            warn!(
                routine = name,
                "Registered a shutdown routine after shutdown completed; it will not run",
            );
            return;
        }

        self.inner
            .routines
            .lock()
            .push((Arc::from(name), Box::new(move || routine().boxed())));
    }

    /// Starts listening for OS termination signals in the background. The
    /// first `SIGINT`, `SIGTERM`, or `SIGHUP` (ctrl-c on non-Unix platforms)
    /// runs the routines; any signal after that exits the process with
    /// status `1`.
    ///
    /// This replaces the default signal handling of the whole process, for
    /// good. Repeated calls have no effect. Must be awaited: listening has
    /// begun by the time the returned future completes.
    pub async fn listen(&self) {
        if self.inner.listening.swap(true, Ordering::AcqRel) {
            return;
        }

        tokio::spawn(listen_for_signals(Arc::clone(&self.inner)));

        // Let the listener register its signal handlers
        tokio::task::yield_now().await;
    }

    /// Runs the routines, unless they run (or ran) already, and waits for
    /// the run to end.
    pub async fn trigger(&self) {
        self.inner.run().await;
        self.completed().await;
    }

    /// Waits until the routines have run.
    pub async fn completed(&self) {
        self.gate().opened().await;
    }

    /// Exposes a [`Gate`] that opens once the routines have run.
    pub fn gate(&self) -> Gate {
        self.inner.latch.gate()
    }

    /// Reports whether the routines have started running.
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::Acquire)
    }
}

impl Default for ShutdownHook {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    async fn run(&self) {
        if self.triggered.swap(true, Ordering::AcqRel) {
            return;
        }

        // Open the gates no matter how the run ends
        defer! { self.latch.release() }

        info!(timeout = ?self.timeout, "Running shutdown routines");

        // A timeout too large to express as a deadline means no deadline
        let deadline = Instant::now().checked_add(self.timeout);
        let mut count = 0usize;

        loop {
            let batch = std::mem::take(&mut *self.routines.lock());
            if batch.is_empty() {
                break;
            }

            for (name, routine) in batch {
                count += 1;
                let running = AssertUnwindSafe(routine()).catch_unwind();
                let finished = match deadline {
                    Some(deadline) => tokio::time::timeout_at(deadline, running).await,
                    None => Ok(running.await),
                };

                match finished {
                    Ok(Ok(())) => info!(routine = name.as_ref(), "Completed a shutdown routine"),
                    Ok(Err(_)) => error!(
                        routine = name.as_ref(),
                        "A shutdown routine panicked; continuing with the rest",
                    ),
                    Err(_) => {
                        warn!(
                            routine = name.as_ref(),
                            timeout = ?self.timeout,
                            "Shutdown timed out; skipping the remaining routines",
                        );
                        return;
                    }
                }
            }
        }

        info!(routines = count, "Completed all shutdown routines");
    }
}

async fn listen_for_signals(inner: Arc<Inner>) {
    let mut signals = match Signals::new() {
        Ok(signals) => signals,
        Err(error) => {
            error!(
                ?error,
                error_message = %error,
                "Failed to listen for shutdown signals",
            );
            return;
        }
    };

    signals.next().await;
    info!("Intercepted a shutdown signal");

    tokio::spawn(async move { inner.run().await });

    signals.next().await;
    warn!("Intercepted a repeated shutdown signal; exiting");

    std::process::exit(1);
}

#[cfg(unix)]
struct Signals {
    interrupt: tokio::signal::unix::Signal,
    terminate: tokio::signal::unix::Signal,
    hangup: tokio::signal::unix::Signal,
}

#[cfg(unix)]
impl Signals {
    fn new() -> std::io::Result<Self> {
        use tokio::signal::unix::{SignalKind, signal};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    async fn next(&mut self) {
        tokio::select! {
            biased;
            _ = self.interrupt.recv() => {}
            _ = self.terminate.recv() => {}
            _ = self.hangup.recv() => {}
        }
    }
}

#[cfg(not(unix))]
struct Signals;

#[cfg(not(unix))]
impl Signals {
    fn new() -> std::io::Result<Self> {
        Ok(Self)
    }

    async fn next(&mut self) {
        if let Err(error) = tokio::signal::ctrl_c().await {
            error!(
                ?error,
                error_message = %error,
                "Failed to listen for ctrl-c",
            );
            std::future::pending::<()>().await;
        }
    }
}
