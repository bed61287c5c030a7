//! Convergence watch state machine.
//!
//! ```text
//! Polling ──event──▶ Converged | Failed | Polling
//!    │                       ▲
//!    └─unknown─▶ UnknownRetry ┘ (refresh, back to Polling)
//! deadline ──▶ TimedOut
//! ```
//!
//! Every event from the platform feed is judged by a condition. `Unknown`
//! verdicts ask the platform for a refresh and are tolerated up to
//! `max_retry_unknown` times in a row; one more is fatal. A closed feed is
//! `StatusUnknown`, never success.

use std::time::Duration;

use futures::StreamExt;
use rollout_core::platform::{ConvergenceEvent, ReleasePlatform};
use rollout_core::release::{HealthStatus, OperationPhase, SyncStatus};
use rollout_core::{Error, ExecContext, Result};
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Bound on the whole watch, further capped by the caller's context.
    pub timeout: Duration,
    /// Consecutive `Unknown` verdicts tolerated.
    pub max_retry_unknown: u32,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(900),
            max_retry_unknown: 5,
        }
    }
}

/// What a condition makes of one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Converged,
    Pending,
    /// The platform could not tell; carries a description.
    Unknown(String),
}

/// Watch states. `Converged`, `Failed` and `TimedOut` are terminal.
#[derive(Debug)]
pub enum WatchState {
    Polling,
    UnknownRetry { reason: String },
    Converged,
    Failed(Error),
    TimedOut,
}

/// Condition for a sync: converged once synced and healthy.
///
/// A failed operation wins over every status, then degraded health.
pub fn sync_condition(event: &ConvergenceEvent) -> Result<Verdict> {
    if let Some(phase) = event.operation_phase.filter(|p| p.is_failure()) {
        for resource in &event.failed_resources {
            warn!(
                group = %resource.group,
                kind = %resource.kind,
                name = %resource.name,
                namespace = %resource.namespace,
                "{}", resource.message
            );
        }
        return Err(Error::SyncFailed {
            reason: event
                .operation_message
                .clone()
                .unwrap_or_else(|| format!("operation {}", phase)),
            resources: event.failed_resources.clone(),
        });
    }

    if event.health_status == HealthStatus::Degraded {
        return Err(Error::HealthDegraded(
            event
                .health_message
                .clone()
                .unwrap_or_else(|| "application reported degraded health".to_string()),
        ));
    }

    if event.sync_status == SyncStatus::Synced && event.health_status == HealthStatus::Healthy {
        return Ok(Verdict::Converged);
    }

    if event.sync_status == SyncStatus::Unknown || event.health_status == HealthStatus::Unknown {
        return Ok(Verdict::Unknown(format!(
            "sync status {}, health status {}",
            event.sync_status, event.health_status
        )));
    }

    Ok(Verdict::Pending)
}

/// [`sync_condition`] for one freshly triggered sync.
///
/// The first events after a trigger may still describe the previous
/// operation. A failed phase only counts once this watch has seen an
/// operation running; until then it is ignored and the statuses decide.
#[derive(Debug, Default)]
pub struct SyncCondition {
    operation_seen: bool,
}

impl SyncCondition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, event: &ConvergenceEvent) -> Result<Verdict> {
        match event.operation_phase {
            Some(OperationPhase::Running | OperationPhase::Terminating) => {
                self.operation_seen = true;
            }
            Some(phase) if phase.is_failure() && !self.operation_seen => {
                debug!(phase = %phase, "ignoring failed phase of an earlier operation");
                let mut current = event.clone();
                current.operation_phase = None;
                return sync_condition(&current);
            }
            _ => {}
        }
        sync_condition(event)
    }
}

/// Watch `release_id` until `condition` converges, fails, or time runs out.
#[instrument(skip(platform, ctx, options, condition), fields(release = %release_id))]
pub async fn watch<C>(
    platform: &dyn ReleasePlatform,
    ctx: &ExecContext,
    release_id: &str,
    revision: &str,
    options: &WatchOptions,
    mut condition: C,
) -> Result<()>
where
    C: FnMut(&ConvergenceEvent) -> Result<Verdict>,
{
    let scope = ctx.bounded(options.timeout);
    let mut feed = match scope
        .guard("opening convergence feed", platform.watch(release_id, revision))
        .await
    {
        Ok(feed) => feed,
        Err(Error::DeadlineExceeded(_)) => {
            return Err(Error::WatchTimeout {
                release: release_id.to_string(),
                timeout: options.timeout,
            });
        }
        Err(err) => return Err(err),
    };
    let mut unknown_count: u32 = 0;
    let mut state = WatchState::Polling;

    loop {
        state = match state {
            WatchState::Polling => {
                let next = tokio::select! {
                    biased;
                    _ = scope.cancellation().cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep_until(scope.deadline()) => None,
                    event = feed.next() => Some(event),
                };

                match next {
                    None => WatchState::TimedOut,
                    Some(None) => WatchState::Failed(Error::StatusUnknown(format!(
                        "convergence feed for '{}' closed before a terminal status",
                        release_id
                    ))),
                    Some(Some(event)) => {
                        debug!(
                            sync = %event.sync_status,
                            health = %event.health_status,
                            "convergence event"
                        );
                        match condition(&event) {
                            Ok(Verdict::Converged) => WatchState::Converged,
                            Ok(Verdict::Pending) => {
                                unknown_count = 0;
                                WatchState::Polling
                            }
                            Ok(Verdict::Unknown(reason)) => {
                                if unknown_count >= options.max_retry_unknown {
                                    WatchState::Failed(Error::StatusUnknown(reason))
                                } else {
                                    unknown_count += 1;
                                    WatchState::UnknownRetry { reason }
                                }
                            }
                            Err(err) => WatchState::Failed(err),
                        }
                    }
                }
            }
            WatchState::UnknownRetry { reason } => {
                warn!(attempt = unknown_count, reason = %reason, "status unknown, refreshing");

                tokio::select! {
                    biased;
                    _ = scope.cancellation().cancelled() => return Err(Error::Cancelled),
                    _ = tokio::time::sleep_until(scope.deadline()) => WatchState::TimedOut,
                    refreshed = platform.get_application(release_id, true) => match refreshed {
                        Ok(_) => WatchState::Polling,
                        Err(err) => WatchState::Failed(err),
                    },
                }
            }
            WatchState::Converged => {
                info!("release converged");
                return Ok(());
            }
            WatchState::Failed(err) => {
                warn!(error = %err, "watch failed");
                return Err(err);
            }
            WatchState::TimedOut => {
                return Err(Error::WatchTimeout {
                    release: release_id.to_string(),
                    timeout: options.timeout,
                });
            }
        };
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use rollout_core::platform::Application;
    use rollout_core::release::ResourceFailure;
    use std::sync::Arc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    pub(crate) fn event(sync: SyncStatus, health: HealthStatus) -> ConvergenceEvent {
        ConvergenceEvent::new(sync, health)
    }

    pub(crate) fn progressing() -> ConvergenceEvent {
        event(SyncStatus::OutOfSync, HealthStatus::Progressing)
    }

    pub(crate) fn healthy() -> ConvergenceEvent {
        event(SyncStatus::Synced, HealthStatus::Healthy)
    }

    pub(crate) fn unknown() -> ConvergenceEvent {
        event(SyncStatus::Unknown, HealthStatus::Unknown)
    }

    /// Feeds a fixed event script and counts what was consumed.
    struct ScriptedPlatform {
        events: Vec<ConvergenceEvent>,
        /// Keep the feed open after the script ends
        hang: bool,
        /// Never answer the request that opens the feed
        stall_open: bool,
        consumed: Arc<AtomicU32>,
        refreshes: AtomicU32,
        seen: Mutex<Vec<String>>,
    }

    impl ScriptedPlatform {
        fn new(events: Vec<ConvergenceEvent>) -> Self {
            Self {
                events,
                hang: false,
                stall_open: false,
                consumed: Arc::new(AtomicU32::new(0)),
                refreshes: AtomicU32::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ReleasePlatform for ScriptedPlatform {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn list_applications(&self, _selector: &str) -> Result<Vec<Application>> {
            Ok(vec![])
        }

        async fn get_application(&self, name: &str, refresh: bool) -> Result<Application> {
            assert!(refresh);
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(Application {
                name: name.to_string(),
                ..Default::default()
            })
        }

        async fn sync(&self, _name: &str, _revision: &str) -> Result<()> {
            Ok(())
        }

        async fn watch(
            &self,
            name: &str,
            revision: &str,
        ) -> Result<BoxStream<'static, ConvergenceEvent>> {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}@{}", name, revision));
            if self.stall_open {
                std::future::pending::<()>().await;
            }

            let consumed = self.consumed.clone();
            let script = futures::stream::iter(self.events.clone()).map(move |e| {
                consumed.fetch_add(1, Ordering::SeqCst);
                e
            });

            if self.hang {
                Ok(script.chain(futures::stream::pending()).boxed())
            } else {
                Ok(script.boxed())
            }
        }
    }

    async fn run(platform: &ScriptedPlatform, options: WatchOptions) -> Result<()> {
        let ctx = ExecContext::new(Duration::from_secs(3600));
        watch(platform, &ctx, "api-eu", "main", &options, sync_condition).await
    }

    #[test]
    fn test_sync_condition_verdicts() {
        assert_eq!(sync_condition(&healthy()).unwrap(), Verdict::Converged);
        assert_eq!(sync_condition(&progressing()).unwrap(), Verdict::Pending);
        assert!(matches!(
            sync_condition(&event(SyncStatus::Synced, HealthStatus::Unknown)).unwrap(),
            Verdict::Unknown(_)
        ));
        assert!(matches!(
            sync_condition(&event(SyncStatus::Synced, HealthStatus::Degraded)),
            Err(Error::HealthDegraded(_))
        ));
    }

    #[test]
    fn test_failed_operation_wins_over_statuses() {
        let mut ev = healthy();
        ev.operation_phase = Some(OperationPhase::Failed);
        ev.operation_message = Some("hook failed".to_string());
        ev.failed_resources = vec![ResourceFailure {
            kind: "Job".to_string(),
            name: "migrate".to_string(),
            ..Default::default()
        }];

        match sync_condition(&ev) {
            Err(Error::SyncFailed { reason, resources }) => {
                assert_eq!(reason, "hook failed");
                assert_eq!(resources.len(), 1);
            }
            other => panic!("expected SyncFailed, got {:?}", other),
        }

        let mut running = healthy();
        running.operation_phase = Some(OperationPhase::Succeeded);
        assert_eq!(sync_condition(&running).unwrap(), Verdict::Converged);
    }

    fn failed(message: &str) -> ConvergenceEvent {
        let mut ev = event(SyncStatus::OutOfSync, HealthStatus::Healthy);
        ev.operation_phase = Some(OperationPhase::Failed);
        ev.operation_message = Some(message.to_string());
        ev
    }

    fn running() -> ConvergenceEvent {
        let mut ev = progressing();
        ev.operation_phase = Some(OperationPhase::Running);
        ev
    }

    #[test]
    fn test_sync_condition_ignores_earlier_failed_operation() {
        let mut condition = SyncCondition::new();

        assert_eq!(condition.check(&failed("previous sync")).unwrap(), Verdict::Pending);
        assert_eq!(condition.check(&running()).unwrap(), Verdict::Pending);

        match condition.check(&failed("hook failed")) {
            Err(Error::SyncFailed { reason, .. }) => assert_eq!(reason, "hook failed"),
            other => panic!("expected SyncFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stale_failure_then_convergence() {
        let mut stale_healthy = healthy();
        stale_healthy.operation_phase = Some(OperationPhase::Failed);
        let platform = ScriptedPlatform::new(vec![failed("previous sync"), stale_healthy]);
        let ctx = ExecContext::new(Duration::from_secs(3600));

        let mut condition = SyncCondition::new();
        let result = watch(
            &platform,
            &ctx,
            "api-eu",
            "main",
            &WatchOptions::default(),
            |ev: &ConvergenceEvent| condition.check(ev),
        )
        .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_failure_after_running_is_fatal() {
        let platform = ScriptedPlatform::new(vec![running(), failed("hook failed"), healthy()]);
        let ctx = ExecContext::new(Duration::from_secs(3600));

        let mut condition = SyncCondition::new();
        let result = watch(
            &platform,
            &ctx,
            "api-eu",
            "main",
            &WatchOptions::default(),
            |ev: &ConvergenceEvent| condition.check(ev),
        )
        .await;

        assert!(matches!(result, Err(Error::SyncFailed { .. })));
    }

    #[tokio::test]
    async fn test_converges_on_third_event() {
        let platform =
            ScriptedPlatform::new(vec![progressing(), progressing(), healthy(), progressing()]);

        run(&platform, WatchOptions::default()).await.unwrap();

        assert_eq!(platform.consumed.load(Ordering::SeqCst), 3);
        assert_eq!(*platform.seen.lock().unwrap(), vec!["api-eu@main"]);
    }

    #[tokio::test]
    async fn test_degraded_stops_consumption() {
        let platform = ScriptedPlatform::new(vec![
            progressing(),
            event(SyncStatus::OutOfSync, HealthStatus::Degraded),
            healthy(),
        ]);

        let result = run(&platform, WatchOptions::default()).await;

        assert!(matches!(result, Err(Error::HealthDegraded(_))));
        assert_eq!(platform.consumed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_unknown_budget_exceeded() {
        // N tolerated, the N+1th is fatal
        let platform = ScriptedPlatform::new(vec![unknown(), unknown(), unknown(), unknown()]);
        let options = WatchOptions {
            max_retry_unknown: 3,
            ..Default::default()
        };

        let result = run(&platform, options).await;

        assert!(matches!(result, Err(Error::StatusUnknown(_))));
        assert_eq!(platform.refreshes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unknown_within_budget_then_converged() {
        let platform = ScriptedPlatform::new(vec![unknown(), unknown(), unknown(), healthy()]);
        let options = WatchOptions {
            max_retry_unknown: 3,
            ..Default::default()
        };

        run(&platform, options).await.unwrap();
        assert_eq!(platform.refreshes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_known_status_resets_unknown_budget() {
        let platform = ScriptedPlatform::new(vec![
            unknown(),
            unknown(),
            progressing(),
            unknown(),
            unknown(),
            healthy(),
        ]);
        let options = WatchOptions {
            max_retry_unknown: 2,
            ..Default::default()
        };

        run(&platform, options).await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_feed_is_status_unknown() {
        let platform = ScriptedPlatform::new(vec![progressing()]);

        let result = run(&platform, WatchOptions::default()).await;

        assert!(matches!(result, Err(Error::StatusUnknown(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_yields_timeout() {
        let mut platform = ScriptedPlatform::new(vec![progressing()]);
        platform.hang = true;
        let options = WatchOptions {
            timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let start = tokio::time::Instant::now();

        let result = run(&platform, options).await;

        match result {
            Err(Error::WatchTimeout { release, timeout }) => {
                assert_eq!(release, "api-eu");
                assert_eq!(timeout, Duration::from_secs(30));
            }
            other => panic!("expected WatchTimeout, got {:?}", other),
        }
        assert!(start.elapsed() >= Duration::from_secs(30));
        assert!(start.elapsed() < Duration::from_secs(31));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_feed_open_yields_timeout() {
        let mut platform = ScriptedPlatform::new(vec![healthy()]);
        platform.stall_open = true;
        let options = WatchOptions {
            timeout: Duration::from_secs(30),
            ..Default::default()
        };
        let start = tokio::time::Instant::now();

        let result = run(&platform, options).await;

        assert!(matches!(result, Err(Error::WatchTimeout { .. })));
        assert_eq!(start.elapsed(), Duration::from_secs(30));
        assert_eq!(platform.consumed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancellation_stops_watch() {
        let mut platform = ScriptedPlatform::new(vec![]);
        platform.hang = true;
        let ctx = ExecContext::new(Duration::from_secs(3600));
        ctx.cancel();

        let result = watch(
            &platform,
            &ctx,
            "api-eu",
            "main",
            &WatchOptions::default(),
            sync_condition,
        )
        .await;

        assert!(matches!(result, Err(Error::Cancelled)));
    }
}
