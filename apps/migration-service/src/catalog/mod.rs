pub mod service;

pub use service::{CatalogSync, ModuleSyncReport, SyncAction};
