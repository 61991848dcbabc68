//! Read-only view of the legacy storefront being migrated.

mod exported;
pub mod types;

use async_trait::async_trait;

pub use exported::{ExportedStorefront, StorefrontExport};
pub use types::{
    LicenseStatus, LocalBilling, LocalCustomer, LocalInstall, LocalLicense, LocalLicenseGraph,
    LocalLicenseOrigin, LocalModule, LocalPaidPlan, LocalPayment, LocalPlan, LocalPricing,
    LocalSubscription, LocalSubscriptionRecord, ModuleKind, SiteDescriptor, canonical_site_url,
};

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to read storefront export: {0}")]
    Io(String),
    #[error("failed to parse storefront export: {0}")]
    Parse(String),
    #[error("storefront data is inconsistent: {0}")]
    Inconsistent(String),
}

/// Everything the migration engines need from the storefront.
///
/// Ids are the storefront's own, as strings. `namespace` scopes every
/// mapping written on behalf of this source.
#[async_trait]
pub trait SourcePlatform: Send + Sync {
    fn namespace(&self) -> &str;

    async fn module(&self, local_module_id: &str) -> Result<Option<LocalModule>, SourceError>;

    async fn modules(&self) -> Result<Vec<LocalModule>, SourceError>;

    /// Finds a license of `local_module_id` by key.
    async fn license_by_key(
        &self,
        local_module_id: &str,
        license_key: &str,
    ) -> Result<Option<LocalLicenseGraph>, SourceError>;

    /// Finds a license by key in any module. Bundle parents live under the
    /// bundle product, not the module being activated.
    async fn find_license(
        &self,
        license_key: &str,
    ) -> Result<Option<LocalLicenseGraph>, SourceError>;

    async fn subscription(
        &self,
        local_subscription_id: &str,
    ) -> Result<Option<LocalSubscriptionRecord>, SourceError>;
}
