//! Hedged requests: race a slow primary against delayed backups.
//!
//! The primary attempt starts immediately. If it has not succeeded after the
//! hedging delay, backups are launched (one per delay, or all at once) until
//! `max_backups` is reached. The first success wins; every other attempt is
//! cancelled through its token and aborted before the call returns.

use std::{collections::HashMap, collections::VecDeque, future::Future, time::Duration};

use futures::{future::BoxFuture, FutureExt};
use parking_lot::Mutex;
use tokio::{
    sync::broadcast,
    task::{Id, JoinSet},
    time::{self, Instant},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::{BackupLaunch, HedgeConfig},
    errors::{ConfigError, ResilienceError},
    executor::CallOptions,
};

const EVENT_CAPACITY: usize = 256;

/// Identifies one leg of a hedged call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Attempt {
    Primary,
    /// 1-based backup number in launch order.
    Backup(usize),
}

impl std::fmt::Display for Attempt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Backup(n) => write!(f, "backup-{n}"),
        }
    }
}

/// One leg of a hedged call. Receives the token that fires once the race is decided.
pub type AttemptFn<T> =
    Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, Result<T, ResilienceError>> + Send>;

/// Boxes an async closure as an [`AttemptFn`].
pub fn attempt<T, F, Fut>(f: F) -> AttemptFn<T>
where
    F: FnOnce(CancellationToken) -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, ResilienceError>> + Send + 'static,
{
    Box::new(move |token| f(token).boxed())
}

/// Result of a successful hedged call.
#[derive(Debug, Clone, PartialEq)]
pub struct Hedged<T> {
    pub value: T,
    pub winner: Attempt,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub enum HedgeEvent {
    BackupTriggered {
        method: String,
        backup: usize,
        elapsed: Duration,
    },
    WinnerDetermined {
        method: String,
        winner: Attempt,
        elapsed: Duration,
    },
    AllFailed {
        method: String,
        attempts: usize,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HedgeStats {
    pub total_requests: u64,
    /// Requests that launched at least one backup.
    pub hedged_requests: u64,
    pub backups_launched: u64,
    pub primary_wins: u64,
    pub backup_wins: u64,
    pub all_failed: u64,
    pub timeouts: u64,
    /// Losing attempts that were still running when the winner was known.
    pub cancelled_attempts: u64,
}

/// Races a primary attempt against delayed backups.
pub struct HedgedManager {
    config: HedgeConfig,
    stats: Mutex<HedgeStats>,
    events: broadcast::Sender<HedgeEvent>,
}

struct Race<T> {
    attempts: JoinSet<Result<T, ResilienceError>>,
    tags: HashMap<Id, Attempt>,
    token: CancellationToken,
    launched: usize,
}

impl<T: Send + 'static> Race<T> {
    fn launch(&mut self, attempt: Attempt, f: AttemptFn<T>) {
        let handle = self.attempts.spawn(f(self.token.clone()));
        self.tags.insert(handle.id(), attempt);
        self.launched += 1;
    }
}

impl HedgedManager {
    /// # Errors
    /// Returns [`ConfigError`] if a delay or timeout is zero.
    pub fn new(config: HedgeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Ok(Self {
            config,
            stats: Mutex::new(HedgeStats::default()),
            events,
        })
    }

    pub fn config(&self) -> &HedgeConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<HedgeEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> HedgeStats {
        self.stats.lock().clone()
    }

    pub fn is_hedgeable(&self, method: &str) -> bool {
        self.config.hedgeable_methods.contains(method)
    }

    /// Delay before the first backup, adapted to the caller's p95 hint when enabled.
    pub fn hedge_delay(&self, options: &CallOptions) -> Duration {
        let base = self.config.hedging_delay;
        match options.p95_latency {
            Some(p95) if self.config.adaptive_delay_enabled => p95.min(base * 2),
            _ => base,
        }
    }

    /// Runs `primary`, hedging it with up to `max_backups` of `backups`.
    ///
    /// Methods that are not hedgeable run `primary` alone. When every launched
    /// attempt has failed and backups remain, the next one starts without waiting
    /// for the delay.
    ///
    /// # Errors
    /// [`ResilienceError::AllFailed`] with every attempt's error in launch order,
    /// [`ResilienceError::Timeout`] once `overall_timeout` elapses, or
    /// [`ResilienceError::Cancelled`] if `options.cancel` fires first.
    pub async fn hedged_request<T>(
        &self,
        method: &str,
        primary: AttemptFn<T>,
        backups: Vec<AttemptFn<T>>,
        options: &CallOptions,
    ) -> Result<Hedged<T>, ResilienceError>
    where
        T: Send + 'static,
    {
        let started = Instant::now();
        let mut backups: VecDeque<AttemptFn<T>> = if self.is_hedgeable(method) {
            backups.into_iter().take(self.config.max_backups).collect()
        } else {
            VecDeque::new()
        };
        let delay = self.hedge_delay(options);
        let limit = match (self.config.overall_timeout, options.timeout) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let mut race = Race {
            attempts: JoinSet::new(),
            tags: HashMap::new(),
            token: options.cancel.child_token(),
            launched: 0,
        };
        race.launch(Attempt::Primary, primary);

        let mut failures = Vec::new();
        let contest = self.contest(method, started, delay, &mut race, &mut backups, &mut failures);
        let outcome = match limit {
            Some(limit) => time::timeout(limit, contest)
                .await
                .unwrap_or(Err(ResilienceError::Timeout(limit))),
            None => contest.await,
        };

        let elapsed = started.elapsed();
        race.token.cancel();
        let losers = race.attempts.len();
        race.attempts.abort_all();
        let drained = time::timeout(self.config.cancellation_timeout, async {
            while race.attempts.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(method, losers, "losing attempts did not stop within cancellation timeout");
        }

        let backups_launched = race.launched - 1;
        {
            let mut stats = self.stats.lock();
            stats.total_requests += 1;
            stats.backups_launched += backups_launched as u64;
            if backups_launched > 0 {
                stats.hedged_requests += 1;
            }
            match &outcome {
                Ok((Attempt::Primary, _)) => {
                    stats.primary_wins += 1;
                    stats.cancelled_attempts += losers as u64;
                }
                Ok((Attempt::Backup(_), _)) => {
                    stats.backup_wins += 1;
                    stats.cancelled_attempts += losers as u64;
                }
                Err(ResilienceError::AllFailed(_)) => stats.all_failed += 1,
                Err(ResilienceError::Timeout(_)) => stats.timeouts += 1,
                Err(_) => {}
            }
        }

        match outcome {
            Ok((winner, value)) => {
                debug!(method, %winner, ?elapsed, losers, "hedged request won");
                let _ = self.events.send(HedgeEvent::WinnerDetermined {
                    method: method.to_string(),
                    winner,
                    elapsed,
                });
                Ok(Hedged {
                    value,
                    winner,
                    elapsed,
                })
            }
            Err(error) => {
                if let ResilienceError::AllFailed(attempts) = &error {
                    let _ = self.events.send(HedgeEvent::AllFailed {
                        method: method.to_string(),
                        attempts: attempts.len(),
                    });
                }
                debug!(method, %error, ?elapsed, "hedged request failed");
                Err(error)
            }
        }
    }

    async fn contest<T: Send + 'static>(
        &self,
        method: &str,
        started: Instant,
        delay: Duration,
        race: &mut Race<T>,
        backups: &mut VecDeque<AttemptFn<T>>,
        failures: &mut Vec<(Attempt, ResilienceError)>,
    ) -> Result<(Attempt, T), ResilienceError> {
        let hedge_timer = time::sleep(delay);
        tokio::pin!(hedge_timer);
        let parent = race.token.clone();

        loop {
            tokio::select! {
                biased;

                () = parent.cancelled() => return Err(ResilienceError::Cancelled),

                Some(joined) = race.attempts.join_next_with_id() => {
                    let (attempt, result) = match joined {
                        Ok((id, result)) => (race.tags.remove(&id), result),
                        Err(join_error) => (
                            race.tags.remove(&join_error.id()),
                            Err(ResilienceError::upstream(
                                method,
                                anyhow::anyhow!("attempt task failed: {join_error}"),
                            )),
                        ),
                    };
                    let attempt = attempt.unwrap_or(Attempt::Primary);

                    match result {
                        Ok(value) => return Ok((attempt, value)),
                        Err(error) => {
                            debug!(method, %attempt, %error, "hedged attempt failed");
                            failures.push((attempt, error));
                        }
                    }

                    if race.attempts.is_empty() {
                        let Some(next) = backups.pop_front() else {
                            failures.sort_by_key(|(attempt, _)| *attempt);
                            return Err(ResilienceError::AllFailed(std::mem::take(failures)));
                        };
                        self.launch_backup(method, started, race, next);
                        hedge_timer.as_mut().reset(Instant::now() + delay);
                    }
                }

                () = &mut hedge_timer, if !backups.is_empty() => {
                    match self.config.backup_launch {
                        BackupLaunch::Staggered => {
                            if let Some(next) = backups.pop_front() {
                                self.launch_backup(method, started, race, next);
                            }
                            hedge_timer.as_mut().reset(Instant::now() + delay);
                        }
                        BackupLaunch::Simultaneous => {
                            while let Some(next) = backups.pop_front() {
                                self.launch_backup(method, started, race, next);
                            }
                        }
                    }
                }
            }
        }
    }

    fn launch_backup<T: Send + 'static>(
        &self,
        method: &str,
        started: Instant,
        race: &mut Race<T>,
        f: AttemptFn<T>,
    ) {
        let backup = race.launched;
        let elapsed = started.elapsed();
        debug!(method, backup, ?elapsed, "launching backup attempt");
        race.launch(Attempt::Backup(backup), f);
        let _ = self.events.send(HedgeEvent::BackupTriggered {
            method: method.to_string(),
            backup,
            elapsed,
        });
    }
}
