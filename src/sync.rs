//! Pull-based refresh of one actor's calendar.
//!
//! There is no push channel: a [`SyncLoop`] re-reads the store on a fixed
//! interval and whenever its handle asks for it, and publishes the projected
//! result. Between refreshes the published view may be stale by up to one
//! interval; a failed refresh leaves the last good view in place.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::time::MissedTickBehavior;

use crate::engine::SchedulerError;
use crate::model::*;
use crate::observability::{SYNC_FAILURES_TOTAL, SYNC_REFRESHES_TOTAL};
use crate::policy::SchedulingPolicy;
use crate::ports::{Clock, PersonDirectory, SchedulingStore};
use crate::projection::AnnotatedEvent;
use crate::scheduler::calendar_for;

/// One published calendar. `generation` 0 means nothing was fetched yet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct View {
    pub events: Vec<AnnotatedEvent>,
    pub fetched_at: Ms,
    pub generation: u64,
}

impl View {
    /// How old the data is at `now`.
    pub fn age(&self, now: Ms) -> Ms {
        (now - self.fetched_at).max(0)
    }
}

/// Client side of a running [`SyncLoop`].
#[derive(Clone)]
pub struct SyncHandle {
    view: watch::Receiver<Arc<View>>,
    trigger: Arc<Notify>,
    failures: Arc<AtomicU64>,
}

impl SyncHandle {
    /// The most recently published view.
    pub fn latest(&self) -> Arc<View> {
        self.view.borrow().clone()
    }

    /// Ask for a refresh now, e.g. right after the user acted.
    pub fn refresh_now(&self) {
        self.trigger.notify_one();
    }

    /// Wait until a newer view is published. Errors once the loop is gone.
    pub async fn changed(&mut self) -> Result<Arc<View>, watch::error::RecvError> {
        self.view.changed().await?;
        Ok(self.view.borrow_and_update().clone())
    }

    /// Refreshes that failed since the loop started.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

pub struct SyncLoop {
    store: Arc<dyn SchedulingStore>,
    directory: Arc<dyn PersonDirectory>,
    clock: Arc<dyn Clock>,
    actor: Actor,
    policy: SchedulingPolicy,
    view_tx: watch::Sender<Arc<View>>,
    trigger: Arc<Notify>,
    failures: Arc<AtomicU64>,
    generation: u64,
}

impl SyncLoop {
    /// Build a loop for `actor`. The poll interval comes from the policy.
    pub fn new(
        store: Arc<dyn SchedulingStore>,
        directory: Arc<dyn PersonDirectory>,
        clock: Arc<dyn Clock>,
        actor: Actor,
        policy: SchedulingPolicy,
    ) -> (Self, SyncHandle) {
        let (view_tx, view_rx) = watch::channel(Arc::new(View::default()));
        let trigger = Arc::new(Notify::new());
        let failures = Arc::new(AtomicU64::new(0));
        let handle = SyncHandle {
            view: view_rx,
            trigger: trigger.clone(),
            failures: failures.clone(),
        };
        let sync = Self {
            store,
            directory,
            clock,
            actor,
            policy,
            view_tx,
            trigger,
            failures,
            generation: 0,
        };
        (sync, handle)
    }

    pub fn interval(&self) -> Duration {
        self.policy.poll_interval
    }

    /// Refresh on every tick (the first one immediately) and on request,
    /// until `shutdown` resolves.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) {
        let mut ticker = tokio::time::interval(self.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.trigger.notified() => {
                    ticker.reset();
                }
                _ = &mut shutdown => break,
            }
            self.refresh().await;
        }
        tracing::debug!(actor = %self.actor.id, "sync loop stopped");
    }

    /// One pull. Publishes a new view on success.
    pub async fn refresh(&mut self) {
        let now = self.clock.now();
        match self.fetch(now).await {
            Ok(events) => {
                self.generation += 1;
                metrics::counter!(SYNC_REFRESHES_TOTAL).increment(1);
                self.view_tx.send_replace(Arc::new(View {
                    events,
                    fetched_at: now,
                    generation: self.generation,
                }));
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!(SYNC_FAILURES_TOTAL).increment(1);
                let age = self.view_tx.borrow().age(now);
                tracing::warn!(actor = %self.actor.id, "refresh failed, serving view {age} ms old: {e}");
            }
        }
    }

    async fn fetch(&self, now: Ms) -> Result<Vec<AnnotatedEvent>, SchedulerError> {
        calendar_for(
            self.store.as_ref(),
            self.directory.as_ref(),
            self.actor,
            &self.policy,
            now,
        )
        .await
    }
}
