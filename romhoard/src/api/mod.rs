//! HTTP API handlers for romhoard
//!
//! JSON REST endpoints, raw-body file uploads and an SSE stream for job
//! progress.

pub mod collections;
pub mod devices;
pub mod downloads;
pub mod events;
pub mod games;
pub mod health;
pub mod pagination;
pub mod scans;
pub mod settings;
pub mod systems;
pub mod uploads;

pub use collections::collection_routes;
pub use devices::device_routes;
pub use downloads::download_routes;
pub use events::event_routes;
pub use games::game_routes;
pub use health::health_routes;
pub use scans::scan_routes;
pub use settings::settings_routes;
pub use systems::system_routes;
pub use uploads::upload_routes;
