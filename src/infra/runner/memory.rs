//! In-process runner with scripted behaviour, for development and testing.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use crate::core::{
    Batch, ResourceBudget, Runner, RunnerBotReport, RunnerError, RunnerEvent, RunnerHandle,
    RunnerSession,
};

/// What a scripted runner does after starting.
#[derive(Debug, Clone)]
pub enum ScriptedBehavior {
    /// Report per-bot outcomes after `after`; listed bots fail in-page.
    Complete {
        /// Delay before reporting.
        after: Duration,
        /// `(bot id, error)` pairs reported as in-page failures.
        failures: Vec<(u64, String)>,
    },
    /// Report a fatal error after `after`.
    Error {
        /// Delay before reporting.
        after: Duration,
        /// Error message.
        message: String,
    },
    /// Exit with `code` after `after` without reporting.
    Exit {
        /// Delay before exiting.
        after: Duration,
        /// Exit status; `None` for a signal.
        code: Option<i32>,
    },
    /// Never report; keep running until stopped.
    Silent,
    /// Fail inside `start`.
    LaunchFailure(String),
}

impl ScriptedBehavior {
    /// Immediate successful report.
    #[must_use]
    pub const fn complete() -> Self {
        Self::Complete {
            after: Duration::ZERO,
            failures: Vec::new(),
        }
    }

    /// Immediate fatal error.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            after: Duration::ZERO,
            message: message.into(),
        }
    }
}

/// How a scripted runner answers a graceful stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopBehavior {
    /// Exits as soon as asked.
    Cooperative,
    /// Ignores graceful stops; only a forced stop ends it.
    Stubborn,
}

/// Counters shared by every unit a scripted runner starts.
#[derive(Debug, Default)]
pub struct RunnerStats {
    started: AtomicUsize,
    live: AtomicUsize,
    unreported: AtomicUsize,
    peak_unreported: AtomicUsize,
    graceful_requests: AtomicUsize,
    forced: AtomicUsize,
}

impl RunnerStats {
    /// Units started.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Units that have not exited.
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Highest number of started-but-unreported units seen at once.
    pub fn peak_unreported(&self) -> usize {
        self.peak_unreported.load(Ordering::SeqCst)
    }

    /// Graceful stop requests received.
    pub fn graceful_requests(&self) -> usize {
        self.graceful_requests.load(Ordering::SeqCst)
    }

    /// Units killed by a forced stop.
    pub fn forced(&self) -> usize {
        self.forced.load(Ordering::SeqCst)
    }
}

type Script = dyn Fn(&Batch) -> ScriptedBehavior + Send + Sync;
type StopScript = dyn Fn(&Batch) -> StopBehavior + Send + Sync;

/// Runner whose behaviour per batch is chosen by a closure.
#[derive(Clone)]
pub struct ScriptedRunner {
    script: Arc<Script>,
    stop: Arc<StopScript>,
    stats: Arc<RunnerStats>,
}

impl ScriptedRunner {
    /// Runner applying `script` to every batch; units stop cooperatively.
    pub fn new(script: impl Fn(&Batch) -> ScriptedBehavior + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(script),
            stop: Arc::new(|_| StopBehavior::Cooperative),
            stats: Arc::new(RunnerStats::default()),
        }
    }

    /// Runner whose units always report success at once.
    #[must_use]
    pub fn completing() -> Self {
        Self::new(|_| ScriptedBehavior::complete())
    }

    /// Choose the stop behaviour per batch.
    #[must_use]
    pub fn with_stop_behavior(
        mut self,
        stop: impl Fn(&Batch) -> StopBehavior + Send + Sync + 'static,
    ) -> Self {
        self.stop = Arc::new(stop);
        self
    }

    /// Shared counters.
    #[must_use]
    pub fn stats(&self) -> Arc<RunnerStats> {
        Arc::clone(&self.stats)
    }
}

struct ScriptedHandle {
    exited: watch::Sender<bool>,
    reported: Arc<AtomicBool>,
    stop: StopBehavior,
    stats: Arc<RunnerStats>,
    events: mpsc::Sender<RunnerEvent>,
}

impl ScriptedHandle {
    fn mark_reported(&self) {
        mark_reported(&self.reported, &self.stats);
    }

    fn mark_exited(&self, code: Option<i32>) -> bool {
        let changed = self.exited.send_if_modified(|exited| {
            if *exited {
                false
            } else {
                *exited = true;
                true
            }
        });
        if changed {
            self.mark_reported();
            self.stats.live.fetch_sub(1, Ordering::SeqCst);
            let _ = self.events.try_send(RunnerEvent::Exited(code));
        }
        changed
    }

    fn has_exited(&self) -> bool {
        *self.exited.borrow()
    }
}

fn mark_reported(reported: &AtomicBool, stats: &RunnerStats) {
    if !reported.swap(true, Ordering::SeqCst) {
        stats.unreported.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RunnerHandle for ScriptedHandle {
    async fn request_graceful_stop(&self) {
        self.stats.graceful_requests.fetch_add(1, Ordering::SeqCst);
        if self.stop == StopBehavior::Cooperative {
            self.mark_exited(Some(0));
        }
    }

    async fn force_stop(&self) {
        if self.mark_exited(None) {
            self.stats.forced.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn wait_exited(&self) {
        let mut rx = self.exited.subscribe();
        let _ = rx.wait_for(|exited| *exited).await;
    }
}

#[async_trait]
impl Runner for ScriptedRunner {
    async fn start(&self, batch: Batch, _budget: ResourceBudget) -> Result<RunnerSession, RunnerError> {
        let behavior = (self.script)(&batch);
        if let ScriptedBehavior::LaunchFailure(message) = &behavior {
            return Err(RunnerError::Launch(message.clone()));
        }

        let (tx, rx) = mpsc::channel(4);
        let (exited, _) = watch::channel(false);
        let handle = Arc::new(ScriptedHandle {
            exited,
            reported: Arc::new(AtomicBool::new(false)),
            stop: (self.stop)(&batch),
            stats: Arc::clone(&self.stats),
            events: tx.clone(),
        });
        self.stats.started.fetch_add(1, Ordering::SeqCst);
        self.stats.live.fetch_add(1, Ordering::SeqCst);
        let now = self.stats.unreported.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.peak_unreported.fetch_max(now, Ordering::SeqCst);

        let unit = Arc::clone(&handle);
        tokio::spawn(async move {
            let (after, event) = match behavior {
                ScriptedBehavior::Complete { after, failures } => {
                    let reports = batch
                        .bots
                        .iter()
                        .map(|bot| {
                            let failure = failures.iter().find(|(id, _)| *id == bot.id);
                            RunnerBotReport {
                                bot_id: bot.id,
                                success: failure.is_none(),
                                error: failure.map(|(_, e)| e.clone()),
                            }
                        })
                        .collect();
                    (after, RunnerEvent::Completed(reports))
                }
                ScriptedBehavior::Error { after, message } => (after, RunnerEvent::Errored(message)),
                ScriptedBehavior::Exit { after, code } => {
                    tokio::time::sleep(after).await;
                    unit.mark_exited(code);
                    return;
                }
                ScriptedBehavior::Silent | ScriptedBehavior::LaunchFailure(_) => return,
            };
            tokio::time::sleep(after).await;
            if unit.has_exited() {
                return;
            }
            unit.mark_reported();
            let _ = tx.send(event).await;
        });

        Ok(RunnerSession {
            handle,
            events: rx,
        })
    }
}
