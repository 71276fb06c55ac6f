//! ROM library: file classification, name parsing, archives, the system
//! catalogue, scanning, uploads, identification, merging, downloads and
//! collections

pub mod archive;
pub mod chd;
pub mod collection_archive;
pub mod collections;
pub mod download;
pub mod extensions;
pub mod genres;
pub mod identify;
pub mod lookup;
pub mod merge;
pub mod parser;
pub mod presets;
pub mod romset_scoring;
pub mod scanner;
pub mod systems;
pub mod upload;

pub use archive::{ArchiveError, ArchiveInfo};
pub use parser::{parse_rom_filename, ParsedRom};
pub use scanner::{scan_directory, ProgressSink, ScanError, ScanOptions, ScanProgress, ScanResult};
