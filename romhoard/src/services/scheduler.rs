//! Periodic scheduler: due scan paths and expired downloads

use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::scan_runner::{active_scan_for_path, start_scan, StartScanRequest};
use crate::db;
use crate::library::download::cleanup_expired_downloads;
use crate::AppState;

/// Counts from one scheduler pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerPass {
    pub scans_started: usize,
    pub downloads_removed: usize,
}

/// Start scans for due paths and delete expired bundles
pub async fn scheduler_pass(state: &AppState) -> SchedulerPass {
    let mut pass = SchedulerPass::default();
    let now = Utc::now();

    match db::scan_paths::list_scan_paths(&state.db).await {
        Ok(paths) => {
            for scan_path in paths.into_iter().filter(|p| p.is_due(now)) {
                match active_scan_for_path(state, &scan_path.path).await {
                    Ok(Some(_)) => {
                        debug!(path = %scan_path.path, "Scheduled scan skipped; one is already active");
                        continue;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(path = %scan_path.path, "Cannot check for active scan: {}", e);
                        continue;
                    }
                }

                let request = StartScanRequest {
                    path: scan_path.path.clone(),
                    use_hasheous: scan_path.use_hasheous,
                };
                match start_scan(state, &request).await {
                    Ok(job) => {
                        info!(job_id = %job.job_id, path = %scan_path.path, "Scheduled scan started");
                        pass.scans_started += 1;
                    }
                    Err(e) => warn!(path = %scan_path.path, "Scheduled scan not started: {}", e),
                }
            }
        }
        Err(e) => error!("Scheduler cannot list scan paths: {}", e),
    }

    match cleanup_expired_downloads(&state.db).await {
        Ok(removed) => pass.downloads_removed = removed,
        Err(e) => error!("Download cleanup failed: {}", e),
    }

    pass
}

/// Run passes until the shutdown token is cancelled
///
/// `interval_override` (from the config file) takes precedence over the
/// `scan_schedule_check_secs` setting.
pub async fn run_scheduler(state: AppState, interval_override: Option<u64>) {
    let secs = match interval_override {
        Some(secs) => secs,
        None => db::settings::get_scan_schedule_check_secs(&state.db)
            .await
            .unwrap_or(600),
    }
    .max(1);
    info!("Starting scheduler (interval: {}s)", secs);

    let mut timer = interval(Duration::from_secs(secs));
    timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                info!("Scheduler stopped");
                break;
            }
            _ = timer.tick() => {
                let pass = scheduler_pass(&state).await;
                debug!(
                    scans_started = pass.scans_started,
                    downloads_removed = pass.downloads_removed,
                    "Scheduler pass finished"
                );
            }
        }
    }
}
