pub mod api;
pub mod canvas;
pub mod control;
pub mod core;
pub mod environment;
pub mod error;
pub mod fetcher;
pub mod intent;
pub mod palette;
pub mod progress;
pub mod schedule;
pub mod track_change;

pub use crate::core::{CoreCommand, CoreHandle, CoreStatus, CoreUpdate, SyncCore, ViewState};
pub use crate::error::{SyncError, SyncResult};
