pub mod error;
pub mod request;
pub mod service;
#[cfg(test)]
mod tests;

pub use error::MigrationError;
pub use request::{LicenseSelector, MigrationRequest, MigrationTarget, NetworkSite};
pub use service::{BundleKind, MigrationEndpoint, MigrationResponse};
