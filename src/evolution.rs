//! Report-only evolution tracker.
//!
//! Owns per-key access statistics fed from the retrieval path over a bounded
//! channel and periodically recommends stale keys for pruning. It never
//! deletes anything; recommendations flow out over a channel for an operator
//! or a later phase to act on.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::EvolutionConfig;

const ACCESS_CHANNEL_CAPACITY: usize = 1024;

/// Aggregation key for access statistics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AccessKey {
    pub topic: String,
    pub project: String,
    pub agent_name: String,
}

/// One retrieval touching a key.
#[derive(Debug, Clone)]
pub struct AccessEvent {
    pub key: AccessKey,
    pub at: DateTime<Utc>,
}

/// Running statistics for one key. Owned exclusively by the tracker task.
#[derive(Debug, Clone)]
pub struct AccessStat {
    pub access_count: u64,
    pub first_access: DateTime<Utc>,
    pub last_access: DateTime<Utc>,
}

/// A key whose decay weight has fallen below the prune threshold.
#[derive(Debug, Clone)]
pub struct PruneRecommendation {
    pub key: AccessKey,
    pub weight: f64,
    pub access_count: u64,
    pub last_access: DateTime<Utc>,
    pub generated_at: DateTime<Utc>,
}

/// Exponential decay weight: 1.0 at the moment of access, halved every
/// half-life. A zero half-life decays immediately.
pub fn decay_weight(elapsed: Duration, half_life: Duration) -> f64 {
    if half_life.is_zero() {
        return if elapsed.is_zero() { 1.0 } else { 0.0 };
    }
    let ratio = elapsed.as_secs_f64() / half_life.as_secs_f64();
    (-std::f64::consts::LN_2 * ratio).exp()
}

/// Non-blocking producer half of the access channel. Dropping events when
/// the tracker lags is deliberate; retrieval latency wins over bookkeeping.
#[derive(Clone)]
pub struct AccessSender {
    tx: mpsc::Sender<AccessEvent>,
}

impl AccessSender {
    pub fn record(&self, event: AccessEvent) {
        if self.tx.try_send(event).is_err() {
            debug!("Access event dropped, tracker lagging or stopped");
        }
    }
}

/// The tracker's mutable state, separated from the task loop so the decay
/// and report logic is testable without time or channels.
#[derive(Default)]
struct TrackerState {
    stats: HashMap<AccessKey, AccessStat>,
}

impl TrackerState {
    fn record(&mut self, event: AccessEvent) {
        self.stats
            .entry(event.key)
            .and_modify(|stat| {
                stat.access_count += 1;
                if event.at > stat.last_access {
                    stat.last_access = event.at;
                }
            })
            .or_insert(AccessStat {
                access_count: 1,
                first_access: event.at,
                last_access: event.at,
            });
    }

    fn report(&self, now: DateTime<Utc>, config: &EvolutionConfig) -> Vec<PruneRecommendation> {
        self.stats
            .iter()
            .filter_map(|(key, stat)| {
                let elapsed = (now - stat.last_access).to_std().unwrap_or_default();
                let weight = decay_weight(elapsed, config.half_life);
                (weight < config.prune_threshold).then(|| PruneRecommendation {
                    key: key.clone(),
                    weight,
                    access_count: stat.access_count,
                    last_access: stat.last_access,
                    generated_at: now,
                })
            })
            .collect()
    }
}

/// Handle to a running tracker task.
pub struct EvolutionHandle {
    access_tx: mpsc::Sender<AccessEvent>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl EvolutionHandle {
    pub fn access_sender(&self) -> AccessSender {
        AccessSender {
            tx: self.access_tx.clone(),
        }
    }

    /// Stop the tracker and wait for its task to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        let _ = self.task.await;
    }
}

/// Spawn the tracker task. Returns the control handle and the receiver of
/// prune recommendations.
pub fn spawn(config: EvolutionConfig) -> (EvolutionHandle, mpsc::Receiver<PruneRecommendation>) {
    let (access_tx, mut access_rx) = mpsc::channel::<AccessEvent>(ACCESS_CHANNEL_CAPACITY);
    let (report_tx, report_rx) = mpsc::channel::<PruneRecommendation>(ACCESS_CHANNEL_CAPACITY);
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        let mut state = TrackerState::default();
        let mut ticker = tokio::time::interval(config.report_interval);
        // the immediate first tick would report an empty state
        ticker.tick().await;

        loop {
            tokio::select! {
                event = access_rx.recv() => {
                    match event {
                        Some(event) => state.record(event),
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    let recommendations = state.report(Utc::now(), &config);
                    if !recommendations.is_empty() {
                        info!(count = recommendations.len(),
                              "Stale memory keys recommended for pruning");
                    }
                    for rec in recommendations {
                        if report_tx.try_send(rec).is_err() {
                            debug!("Prune recommendation dropped, receiver not draining");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });

    (
        EvolutionHandle {
            access_tx,
            shutdown_tx,
            task,
        },
        report_rx,
    )
}
