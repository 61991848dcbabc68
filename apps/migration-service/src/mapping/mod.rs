pub mod service;
pub mod store;
pub mod types;


pub use service::EntityMapper;
pub use store::{MappingStore, MappingStoreError};
pub use types::{EntityType, LinkOutcome, MappingRecord};
