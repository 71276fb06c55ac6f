//! Background job records: scans, saved scan paths, download bundles and
//! uploads

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a scan or download job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Pending | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => Err(format!("Unknown job status: {}", other)),
        }
    }
}

/// How often a saved scan path is rescanned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleInterval {
    Hourly,
    #[default]
    Daily,
    Weekly,
    Monthly,
}

impl ScheduleInterval {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleInterval::Hourly => "hourly",
            ScheduleInterval::Daily => "daily",
            ScheduleInterval::Weekly => "weekly",
            ScheduleInterval::Monthly => "monthly",
        }
    }

    /// Months count as 30 days
    pub fn duration(&self) -> Duration {
        match self {
            ScheduleInterval::Hourly => Duration::hours(1),
            ScheduleInterval::Daily => Duration::days(1),
            ScheduleInterval::Weekly => Duration::weeks(1),
            ScheduleInterval::Monthly => Duration::days(30),
        }
    }
}

impl FromStr for ScheduleInterval {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(ScheduleInterval::Hourly),
            "daily" => Ok(ScheduleInterval::Daily),
            "weekly" => Ok(ScheduleInterval::Weekly),
            "monthly" => Ok(ScheduleInterval::Monthly),
            other => Err(format!("Unknown schedule interval: {}", other)),
        }
    }
}

/// A directory the user scans repeatedly
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanPath {
    pub id: i64,
    pub path: String,
    pub use_hasheous: bool,
    pub schedule_enabled: bool,
    pub schedule_interval: ScheduleInterval,
    pub last_scanned: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScanPath {
    /// When the next scheduled scan is due
    pub fn next_scan_time(&self) -> Option<DateTime<Utc>> {
        if !self.schedule_enabled {
            return None;
        }
        self.last_scanned.map(|t| t + self.schedule_interval.duration())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        if !self.schedule_enabled {
            return false;
        }
        match self.next_scan_time() {
            Some(next) => now >= next,
            None => true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanJob {
    pub job_id: Uuid,
    pub path: String,
    pub status: JobStatus,
    pub use_hasheous: bool,
    pub files_processed: i64,
    pub roms_found: i64,
    pub images_found: i64,
    pub current_directory: String,
    pub added: i64,
    pub skipped: i64,
    pub deleted_roms: i64,
    pub images_added: i64,
    pub images_skipped: i64,
    pub identified: i64,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub scan_started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    pub job_id: Uuid,
    pub status: JobStatus,
    pub game_ids: Vec<i64>,
    pub system_slug: String,
    pub device_id: Option<i64>,
    pub games_total: i64,
    pub games_processed: i64,
    pub current_game: String,
    pub bytes_written: i64,
    pub file_path: String,
    pub file_name: String,
    pub file_size: i64,
    pub games_included: i64,
    pub games_failed: i64,
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl DownloadJob {
    /// Progress 0-100 by games processed
    pub fn percent(&self) -> i64 {
        if self.status == JobStatus::Completed {
            return 100;
        }
        if self.games_total <= 0 {
            return 0;
        }
        (self.games_processed * 100 / self.games_total).clamp(0, 100)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| now >= t).unwrap_or(false)
    }
}

/// Lifecycle of an upload job
///
/// `Awaiting` means some files need a system chosen by the user before the
/// job can finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Uploading,
    Processing,
    Awaiting,
    Completed,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Uploading => "uploading",
            UploadStatus::Processing => "processing",
            UploadStatus::Awaiting => "awaiting",
            UploadStatus::Completed => "completed",
            UploadStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "uploading" => Ok(UploadStatus::Uploading),
            "processing" => Ok(UploadStatus::Processing),
            "awaiting" => Ok(UploadStatus::Awaiting),
            "completed" => Ok(UploadStatus::Completed),
            "failed" => Ok(UploadStatus::Failed),
            other => Err(format!("Unknown upload status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadJob {
    pub job_id: Uuid,
    pub status: UploadStatus,
    pub use_hasheous: bool,
    pub files_total: i64,
    pub files_uploaded: i64,
    pub bytes_total: i64,
    pub bytes_uploaded: i64,
    pub files_processed: i64,
    pub current_file: String,
    pub games_added: i64,
    pub games_skipped: i64,
    pub games_failed: i64,
    /// File names waiting for a system assignment
    pub unidentified: Vec<String>,
    pub errors: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_path(enabled: bool, last: Option<DateTime<Utc>>, interval: ScheduleInterval) -> ScanPath {
        ScanPath {
            id: 1,
            path: "/roms".into(),
            use_hasheous: true,
            schedule_enabled: enabled,
            schedule_interval: interval,
            last_scanned: last,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_status_round_trip_and_flags() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<JobStatus>().unwrap(), status);
            assert_ne!(status.is_terminal(), status.is_active());
        }
        assert!("done".parse::<JobStatus>().is_err());

        assert_eq!("awaiting".parse::<UploadStatus>().unwrap(), UploadStatus::Awaiting);
        assert_eq!(UploadStatus::Processing.to_string(), "processing");
        assert!("pending".parse::<UploadStatus>().is_err());
    }

    #[test]
    fn test_schedule_due() {
        let now = Utc::now();
        assert!(!scan_path(false, None, ScheduleInterval::Daily).is_due(now));
        assert!(scan_path(true, None, ScheduleInterval::Daily).is_due(now));

        let recent = scan_path(true, Some(now - Duration::minutes(30)), ScheduleInterval::Hourly);
        assert!(!recent.is_due(now));
        assert_eq!(recent.next_scan_time(), Some(now + Duration::minutes(30)));

        let stale = scan_path(true, Some(now - Duration::days(31)), ScheduleInterval::Monthly);
        assert!(stale.is_due(now));
        assert_eq!(scan_path(false, Some(now), ScheduleInterval::Weekly).next_scan_time(), None);
    }
}
