//! Background detection loop

use crate::config::SchedulerConfig;
use appetite_core::{AppetiteResult, RiskAppetiteEngine};
use futures::future::join_all;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Runs `detect_and_enforce` for every tenant with an active appetite.
pub struct DetectionScheduler {
    config: SchedulerConfig,
    engine: RiskAppetiteEngine,
}

/// Outcome of one scheduler pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassSummary {
    pub tenants: usize,
    pub new_breaches: usize,
    pub failed_tenants: usize,
}

impl DetectionScheduler {
    pub fn new(config: SchedulerConfig, engine: RiskAppetiteEngine) -> Self {
        Self { config, engine }
    }

    /// Detect across all tenants concurrently. Per-tenant failures are logged.
    pub async fn run_once(&self) -> AppetiteResult<PassSummary> {
        let tenants = self.engine.appetites().active_tenants().await?;

        let results = join_all(tenants.iter().map(|tenant_id| async move {
            (tenant_id, self.engine.detect_and_enforce(tenant_id).await)
        }))
        .await;

        let mut summary = PassSummary {
            tenants: tenants.len(),
            ..Default::default()
        };
        for (tenant_id, result) in results {
            match result {
                Ok(report) => summary.new_breaches += report.detected,
                Err(e) => {
                    summary.failed_tenants += 1;
                    tracing::error!(tenant_id = %tenant_id, error = %e, "Scheduled detection failed");
                }
            }
        }

        tracing::info!(
            tenants = summary.tenants,
            new_breaches = summary.new_breaches,
            failed = summary.failed_tenants,
            "Scheduled detection pass complete"
        );
        Ok(summary)
    }

    /// Loop until `shutdown` flips to true.
    pub async fn start(self, mut shutdown: watch::Receiver<bool>) {
        if !self.config.enabled {
            tracing::info!("Detection scheduler disabled");
            return;
        }

        let mut ticker = interval(Duration::from_secs(self.config.interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = self.config.interval_secs, "Detection scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        tracing::error!(error = %e, "Detection pass failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("Detection scheduler stopped");
    }
}
