//! Fallback orchestration across backend drivers.
//!
//! Drivers run in priority order and the first success short-circuits the
//! chain. Failures are isolated: each driver's error becomes one diagnostic
//! attempt record, and only the aggregate decides the terminal outcome. The
//! primary driver's credential fetch is kicked off eagerly so its latency is
//! hidden whenever an earlier driver wins.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channel::Channel;
use crate::credential::CredentialBroker;
use crate::driver::{BackendAttempt, BackendDriver, DriverError, FetchedManifest};

/// Terminal outcome of one resolution. `Offline` means at least one backend
/// confirmed the channel exists upstream but is not currently streaming,
/// which players render differently from a dead channel.
pub enum ResolveOutcome {
    Resolved(FetchedManifest),
    Offline(Vec<BackendAttempt>),
    Failed(Vec<BackendAttempt>),
}

pub struct Orchestrator {
    drivers: Vec<Arc<dyn BackendDriver>>,
    broker: CredentialBroker,
    skip: HashSet<String>,
}

impl Orchestrator {
    pub fn new(
        drivers: Vec<Arc<dyn BackendDriver>>,
        broker: CredentialBroker,
        skip_drivers: &[String],
    ) -> Self {
        Self {
            drivers,
            broker,
            skip: skip_drivers.iter().cloned().collect(),
        }
    }

    pub async fn resolve(&self, channel: &Channel) -> ResolveOutcome {
        // Eager credential prefetch: the result lands in the broker's cache,
        // where the primary driver will find it. If an earlier driver wins,
        // the task finishes in the background and only warms the cache.
        let prefetch_broker = self.broker.clone();
        let channel_id = channel.public_id;
        tokio::spawn(async move {
            prefetch_broker.fetch_credential(channel_id).await;
        });

        let mut attempts: Vec<BackendAttempt> = Vec::new();
        let mut saw_offline = false;

        for driver in &self.drivers {
            if self.skip.contains(driver.name()) {
                debug!(driver = driver.name(), channel_id, "driver skipped by configuration");
                continue;
            }
            match driver.attempt(channel).await {
                Ok(manifest) => {
                    info!(
                        driver = driver.name(),
                        channel_id,
                        failed_before = attempts.len(),
                        "channel resolved"
                    );
                    return ResolveOutcome::Resolved(manifest);
                }
                Err(e) => {
                    if matches!(e, DriverError::Offline) {
                        saw_offline = true;
                    }
                    debug!(driver = driver.name(), channel_id, error = %e, "driver attempt failed");
                    attempts.push(BackendAttempt {
                        backend: driver.name().to_string(),
                        detail: e.to_string(),
                    });
                }
            }
        }

        warn!(
            channel_id,
            attempts = attempts.len(),
            offline = saw_offline,
            "all backends exhausted"
        );
        if saw_offline {
            ResolveOutcome::Offline(attempts)
        } else {
            ResolveOutcome::Failed(attempts)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedDriver {
        name: &'static str,
        outcome: fn() -> Result<FetchedManifest, DriverError>,
        calls: AtomicUsize,
    }

    impl ScriptedDriver {
        fn new(
            name: &'static str,
            outcome: fn() -> Result<FetchedManifest, DriverError>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                outcome,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl BackendDriver for ScriptedDriver {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn attempt(&self, _channel: &Channel) -> Result<FetchedManifest, DriverError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn ok_manifest() -> Result<FetchedManifest, DriverError> {
        Ok(FetchedManifest {
            body: "#EXTM3U\n#EXTINF:6.0,\nseg.ts\n".to_string(),
            source_url: "https://upstream.example/m.m3u8".to_string(),
        })
    }

    fn not_mapped() -> Result<FetchedManifest, DriverError> {
        Err(DriverError::NotMapped)
    }

    fn offline() -> Result<FetchedManifest, DriverError> {
        Err(DriverError::Offline)
    }

    struct NoSource;

    #[async_trait]
    impl crate::credential::CredentialSource for NoSource {
        async fn embed_page(&self, _: &str) -> anyhow::Result<String> {
            anyhow::bail!("unused")
        }
        async fn directory_page(&self) -> anyhow::Result<String> {
            anyhow::bail!("unused")
        }
    }

    fn orchestrator_with(
        drivers: Vec<Arc<ScriptedDriver>>,
        skip: &[String],
    ) -> (Orchestrator, Vec<Arc<ScriptedDriver>>) {
        let dyn_drivers: Vec<Arc<dyn BackendDriver>> = drivers
            .iter()
            .map(|d| d.clone() as Arc<dyn BackendDriver>)
            .collect();
        let broker = CredentialBroker::new(Arc::new(NoSource));
        (Orchestrator::new(dyn_drivers, broker, skip), drivers)
    }

    #[tokio::test]
    async fn first_success_short_circuits() {
        let (orchestrator, drivers) = orchestrator_with(
            vec![
                ScriptedDriver::new("static", ok_manifest),
                ScriptedDriver::new("token", ok_manifest),
                ScriptedDriver::new("primary", ok_manifest),
            ],
            &[],
        );

        let outcome = orchestrator.resolve(&Channel::default()).await;
        assert!(matches!(outcome, ResolveOutcome::Resolved(_)));
        assert_eq!(drivers[0].calls.load(Ordering::SeqCst), 1);
        assert_eq!(drivers[1].calls.load(Ordering::SeqCst), 0);
        assert_eq!(drivers[2].calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failures_advance_in_priority_order() {
        let (orchestrator, drivers) = orchestrator_with(
            vec![
                ScriptedDriver::new("static", not_mapped),
                ScriptedDriver::new("token", ok_manifest),
                ScriptedDriver::new("primary", ok_manifest),
            ],
            &[],
        );

        let outcome = orchestrator.resolve(&Channel::default()).await;
        assert!(matches!(outcome, ResolveOutcome::Resolved(_)));
        assert_eq!(drivers[0].calls.load(Ordering::SeqCst), 1);
        assert_eq!(drivers[1].calls.load(Ordering::SeqCst), 1);
        assert_eq!(drivers[2].calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn all_failures_collect_one_attempt_per_driver() {
        let (orchestrator, _) = orchestrator_with(
            vec![
                ScriptedDriver::new("static", not_mapped),
                ScriptedDriver::new("token", not_mapped),
                ScriptedDriver::new("primary", not_mapped),
            ],
            &[],
        );

        match orchestrator.resolve(&Channel::default()).await {
            ResolveOutcome::Failed(attempts) => {
                assert_eq!(attempts.len(), 3);
                assert_eq!(attempts[0].backend, "static");
                assert_eq!(attempts[2].backend, "primary");
            }
            _ => panic!("expected Failed"),
        }
    }

    #[tokio::test]
    async fn offline_signal_wins_over_generic_failure() {
        let (orchestrator, _) = orchestrator_with(
            vec![
                ScriptedDriver::new("static", not_mapped),
                ScriptedDriver::new("token", offline),
                ScriptedDriver::new("primary", not_mapped),
            ],
            &[],
        );

        let outcome = orchestrator.resolve(&Channel::default()).await;
        assert!(matches!(outcome, ResolveOutcome::Offline(_)));
    }

    #[tokio::test]
    async fn skip_list_excludes_drivers() {
        let (orchestrator, drivers) = orchestrator_with(
            vec![
                ScriptedDriver::new("static", ok_manifest),
                ScriptedDriver::new("token", ok_manifest),
            ],
            &["static".to_string()],
        );

        let outcome = orchestrator.resolve(&Channel::default()).await;
        assert!(matches!(outcome, ResolveOutcome::Resolved(_)));
        assert_eq!(drivers[0].calls.load(Ordering::SeqCst), 0);
        assert_eq!(drivers[1].calls.load(Ordering::SeqCst), 1);
    }
}
