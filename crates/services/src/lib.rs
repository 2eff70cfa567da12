#![forbid(unsafe_code)]

pub mod error;
pub mod migration_service;
pub mod progress_service;

pub use progress_core::Clock;

pub use error::{MigrationError, ProgressError};
pub use migration_service::{MigrationReport, MigrationService};
pub use progress_service::ProgressService;
