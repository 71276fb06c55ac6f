//! Background jobs: scans, download bundles, uploads and the scheduler

pub mod download_runner;
pub mod scan_runner;
pub mod scheduler;
pub mod upload_runner;

pub use download_runner::{start_download, StartDownloadRequest};
pub use scan_runner::{active_scan_for_path, cancel_scan, start_scan, StartScanRequest};
pub use scheduler::{run_scheduler, scheduler_pass};
pub use upload_runner::{
    check_duplicates, create_upload, finalize_upload, receive_file, resolve_upload, DuplicateQuery, StartUploadRequest,
};
