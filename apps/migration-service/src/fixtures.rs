//! Storefront data shared by the engine, endpoint and router tests.

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};

use crate::catalog::CatalogSync;
use crate::endpoint::MigrationEndpoint;
use crate::fake_platform::FakePlatform;
use crate::licensing::LicenseMigration;
use crate::mapping::{EntityMapper, EntityType, MappingStore, store};
use crate::remote::LicensingRemote;
use crate::source::{
    ExportedStorefront, LicenseStatus, LocalBilling, LocalCustomer, LocalLicense,
    LocalLicenseOrigin, LocalModule, LocalPaidPlan, LocalPayment, LocalPlan, LocalPricing,
    LocalSubscription, ModuleKind, SiteDescriptor, StorefrontExport,
};

pub const NAMESPACE: &str = "edd";

pub struct Harness {
    pub fake: Arc<FakePlatform>,
    pub mapper: EntityMapper,
    pub remote: LicensingRemote,
    pub storefront: Arc<ExportedStorefront>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_store(store::memory())
    }

    pub fn with_store(store: Arc<dyn MappingStore>) -> Self {
        let fake = Arc::new(FakePlatform::new());
        let mapper = EntityMapper::new(NAMESPACE, store);
        let remote = LicensingRemote::new(fake.clone());
        let storefront = Arc::new(storefront());
        Self {
            fake,
            mapper,
            remote,
            storefront,
        }
    }

    pub fn catalog(&self) -> CatalogSync {
        CatalogSync::new(self.mapper.clone(), self.remote.clone())
    }

    pub fn licenses(&self) -> LicenseMigration {
        LicenseMigration::new(self.mapper.clone(), self.remote.clone())
    }

    pub fn endpoint(&self) -> MigrationEndpoint {
        MigrationEndpoint::new(self.mapper.clone(), self.storefront.clone(), self.licenses())
    }

    pub async fn remote_module_id(&self, local_module_id: &str) -> anyhow::Result<u64> {
        self.mapper
            .get_remote_id(EntityType::Module, local_module_id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("module {local_module_id} is not synced"))
    }

    /// Syncs the gallery and bundle catalogs and forgets the calls it made.
    pub async fn with_synced_catalog(self) -> anyhow::Result<Self> {
        let catalog = self.catalog();
        catalog.sync_module(&gallery_module(), false).await?;
        catalog.sync_module(&bundle_module(), false).await?;
        self.fake.clear_calls();
        Ok(self)
    }
}

pub fn at(day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

pub fn gallery_module() -> LocalModule {
    LocalModule {
        id: "12".to_string(),
        slug: "gallery".to_string(),
        title: "Gallery".to_string(),
        kind: ModuleKind::Plugin,
        free_plan: Some(LocalPlan {
            id: "12-free".to_string(),
            title: None,
        }),
        paid_plan: Some(LocalPaidPlan {
            id: "12-pro".to_string(),
            name: "pro".to_string(),
            title: Some("Pro".to_string()),
            pricing: vec![pricing("12-1", Some(1)), pricing("12-5", Some(5)), pricing("12-u", None)],
        }),
    }
}

pub fn bundle_module() -> LocalModule {
    LocalModule {
        id: "40".to_string(),
        slug: "all-access".to_string(),
        title: "All Access".to_string(),
        kind: ModuleKind::Plugin,
        free_plan: None,
        paid_plan: Some(LocalPaidPlan {
            id: "40-pro".to_string(),
            name: "all-access".to_string(),
            title: None,
            pricing: vec![pricing("40-u", None)],
        }),
    }
}

pub fn pricing(id: &str, licenses: Option<u32>) -> LocalPricing {
    LocalPricing {
        id: id.to_string(),
        licenses,
        monthly_price: None,
        annual_price: Some(49.0),
        lifetime_price: None,
    }
}

pub fn payment(id: &str, gross: f64, day: u32) -> LocalPayment {
    LocalPayment {
        id: id.to_string(),
        gross,
        tax: 0.0,
        gateway: "stripe".to_string(),
        external_id: Some(format!("ch_{id}")),
        created_at: at(day),
        is_sandbox: false,
    }
}

pub fn site(uid: &str, url: &str) -> SiteDescriptor {
    SiteDescriptor {
        uid: uid.to_string(),
        url: url.to_string(),
        title: format!("Site {uid}"),
        language: Some("en-US".to_string()),
        charset: Some("UTF-8".to_string()),
        platform_version: "6.4.2".to_string(),
        programming_language_version: "8.2".to_string(),
        module_version: "3.1.0".to_string(),
        is_premium: true,
    }
}

fn customer(id: &str, email: &str, billing: Option<LocalBilling>) -> LocalCustomer {
    LocalCustomer {
        id: id.to_string(),
        email: email.to_string(),
        first_name: "Test".to_string(),
        last_name: id.to_string(),
        billing,
    }
}

fn license(
    id: &str,
    key: &str,
    module_id: &str,
    pricing_id: &str,
    customer_id: &str,
    origin: LocalLicenseOrigin,
) -> LocalLicense {
    LocalLicense {
        id: id.to_string(),
        key: key.to_string(),
        module_id: module_id.to_string(),
        pricing_id: pricing_id.to_string(),
        customer_id: customer_id.to_string(),
        status: LicenseStatus::Active,
        expiration: None,
        parent_license_key: None,
        origin,
    }
}

fn purchase(payment_id: &str, day: u32) -> LocalLicenseOrigin {
    LocalLicenseOrigin::Purchase {
        payment: payment(payment_id, 49.0, day),
    }
}

/// Storefront with purchase, subscription, invalid, bundle and add-on
/// licenses for the gallery module.
pub fn storefront() -> ExportedStorefront {
    let billing = LocalBilling {
        id: "b1".to_string(),
        business_name: Some("Analytical Engines".to_string()),
        phone: None,
        address_street: "1 Loop Rd".to_string(),
        address_city: "London".to_string(),
        address_zip: "N1".to_string(),
        address_state: None,
        address_country_code: "GB".to_string(),
        tax_id: None,
    };

    let subscription = LocalLicenseOrigin::Subscription {
        subscription: LocalSubscription {
            id: "s1".to_string(),
            billing_cycle_months: 12,
            amount_per_cycle: 49.0,
            next_payment_at: Some(at(28)),
            gateway: "stripe".to_string(),
            external_id: Some("sub_1".to_string()),
            created_at: at(1),
        },
        initial_payment: payment("pay-2", 49.0, 1),
        renewals: vec![payment("pay-3", 49.0, 2), payment("pay-4", 49.0, 3)],
    };

    let mut expired = license("l3", "EXPIRED-1", "12", "12-1", "c1", purchase("pay-8", 1));
    expired.status = LicenseStatus::Expired;
    let mut disabled = license("l4", "DISABLED-1", "12", "12-1", "c1", purchase("pay-9", 1));
    disabled.status = LicenseStatus::Disabled;
    let mut addon = license("l6", "ADDON-1", "12", "12-u", "c1", purchase("pay-6", 1));
    addon.parent_license_key = Some("BUNDLE-1".to_string());

    let export = StorefrontExport {
        namespace: Some(NAMESPACE.to_string()),
        modules: vec![gallery_module(), bundle_module()],
        customers: vec![
            customer("c1", "ada@example.com", Some(billing)),
            customer("c2", "grace@example.com", None),
        ],
        licenses: vec![
            license("l1", "PURCHASE-1", "12", "12-1", "c1", purchase("pay-1", 1)),
            license("l2", "SUB-1", "12", "12-5", "c2", subscription),
            expired,
            disabled,
            license("l5", "BUNDLE-1", "40", "40-u", "c1", purchase("pay-5", 1)),
            addon,
            license("l7", "ADDON-2", "12", "12-1", "c2", purchase("pay-7", 1)),
        ],
    };
    match ExportedStorefront::from_export(export, NAMESPACE) {
        Ok(storefront) => storefront,
        Err(error) => panic!("fixture storefront is invalid: {error}"),
    }
}
