pub mod service;

pub use service::{
    InstallMigration, LicenseContext, LicenseMigration, MigratedCustomer, RenewalOutcome,
};
