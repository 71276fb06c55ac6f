//! Data models

pub mod collection;
pub mod device;
pub mod jobs;
pub mod library;

pub use collection::{Collection, CollectionEntry, CollectionInput};
pub use device::{Device, DeviceInput, DevicePreset, PresetFolders, PresetImages, SystemPathConfig};
pub use jobs::{DownloadJob, JobStatus, ScanJob, ScanPath, ScheduleInterval, UploadJob, UploadStatus};
pub use library::{image_type, name_source, Game, GameImage, Genre, NewRom, Rom, RomSet, System};
