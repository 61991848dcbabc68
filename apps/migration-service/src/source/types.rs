use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::remote::{
    BillingPayload, FREE_PLAN_NAME, InstallPayload, ModulePayload, PaymentPayload, PlanPayload,
    PricingPayload, PurchasePayload, SubscriptionPayload, UserPayload,
};

const PRICING_CURRENCY: &str = "usd";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleKind {
    #[default]
    Plugin,
    Theme,
}

impl ModuleKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plugin => "plugin",
            Self::Theme => "theme",
        }
    }
}

/// A product as the storefront knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalModule {
    pub id: String,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub kind: ModuleKind,
    #[serde(default)]
    pub free_plan: Option<LocalPlan>,
    #[serde(default)]
    pub paid_plan: Option<LocalPaidPlan>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalPlan {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalPaidPlan {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub pricing: Vec<LocalPricing>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalPricing {
    pub id: String,
    /// Site quota; `None` means unlimited.
    #[serde(default)]
    pub licenses: Option<u32>,
    #[serde(default)]
    pub monthly_price: Option<f64>,
    #[serde(default)]
    pub annual_price: Option<f64>,
    #[serde(default)]
    pub lifetime_price: Option<f64>,
}

impl LocalModule {
    pub fn local_id(&self) -> &str {
        &self.id
    }

    pub fn has_free_plan(&self) -> bool {
        self.free_plan.is_some()
    }

    pub fn free_plan_id(&self) -> Option<&str> {
        self.free_plan.as_ref().map(|plan| plan.id.as_str())
    }

    pub fn has_paid_plan(&self) -> bool {
        self.paid_plan.is_some()
    }

    pub fn paid_plan_id(&self) -> Option<&str> {
        self.paid_plan.as_ref().map(|plan| plan.id.as_str())
    }

    pub fn paid_plan_pricing(&self) -> &[LocalPricing] {
        self.paid_plan
            .as_ref()
            .map(|plan| plan.pricing.as_slice())
            .unwrap_or_default()
    }

    pub fn module_for_api(&self) -> ModulePayload {
        ModulePayload {
            slug: self.slug.clone(),
            title: self.title.clone(),
            kind: self.kind.as_str(),
        }
    }

    pub fn free_plan_for_api(&self) -> Option<PlanPayload> {
        self.free_plan.as_ref().map(|plan| PlanPayload {
            name: FREE_PLAN_NAME.to_string(),
            title: plan.title.clone().unwrap_or_else(|| "Free".to_string()),
        })
    }

    pub fn paid_plan_for_api(&self) -> Option<PlanPayload> {
        self.paid_plan.as_ref().map(|plan| PlanPayload {
            name: plan.name.clone(),
            title: plan.title.clone().unwrap_or_else(|| plan.name.clone()),
        })
    }
}

impl LocalPricing {
    pub fn pricing_for_api(&self) -> PricingPayload {
        PricingPayload {
            licenses: self.licenses,
            monthly_price: self.monthly_price,
            annual_price: self.annual_price,
            lifetime_price: self.lifetime_price,
            currency: PRICING_CURRENCY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalCustomer {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub billing: Option<LocalBilling>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalBilling {
    pub id: String,
    #[serde(default)]
    pub business_name: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    pub address_street: String,
    pub address_city: String,
    pub address_zip: String,
    #[serde(default)]
    pub address_state: Option<String>,
    pub address_country_code: String,
    #[serde(default)]
    pub tax_id: Option<String>,
}

impl LocalCustomer {
    pub fn customer_for_api(&self) -> UserPayload {
        UserPayload {
            email: self.email.trim().to_string(),
            first: self.first_name.clone(),
            last: self.last_name.clone(),
            is_verified: true,
        }
    }

    pub fn billing_for_api(&self) -> Option<BillingPayload> {
        self.billing.as_ref().map(|billing| BillingPayload {
            business_name: billing.business_name.clone(),
            first: self.first_name.clone(),
            last: self.last_name.clone(),
            email: self.email.trim().to_string(),
            phone: billing.phone.clone(),
            address_street: billing.address_street.clone(),
            address_city: billing.address_city.clone(),
            address_zip: billing.address_zip.clone(),
            address_state: billing.address_state.clone(),
            address_country_code: billing.address_country_code.to_ascii_lowercase(),
            tax_id: billing.tax_id.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LicenseStatus {
    Active,
    Inactive,
    Expired,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalLicense {
    pub id: String,
    pub key: String,
    pub module_id: String,
    pub pricing_id: String,
    pub customer_id: String,
    pub status: LicenseStatus,
    /// `None` for lifetime licenses.
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
    /// Key of the bundle license this add-on license was issued under.
    #[serde(default)]
    pub parent_license_key: Option<String>,
    pub origin: LocalLicenseOrigin,
}

impl LocalLicense {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == LicenseStatus::Expired
            || self.expiration.is_some_and(|expiration| expiration <= now)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LocalLicenseOrigin {
    Purchase {
        payment: LocalPayment,
    },
    Subscription {
        subscription: LocalSubscription,
        initial_payment: LocalPayment,
        /// Oldest first.
        #[serde(default)]
        renewals: Vec<LocalPayment>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalPayment {
    pub id: String,
    pub gross: f64,
    #[serde(default)]
    pub tax: f64,
    pub gateway: String,
    #[serde(default)]
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_sandbox: bool,
}

impl LocalPayment {
    pub fn payment_for_api(&self) -> PaymentPayload {
        PaymentPayload {
            gross: self.gross,
            tax: self.tax,
            gateway: self.gateway.clone(),
            external_id: self.external_id.clone(),
            created: self.created_at,
            is_sandbox: self.is_sandbox,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSubscription {
    pub id: String,
    pub billing_cycle_months: u32,
    pub amount_per_cycle: f64,
    #[serde(default)]
    pub next_payment_at: Option<DateTime<Utc>>,
    pub gateway: String,
    #[serde(default)]
    pub external_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One license with everything needed to migrate it.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalLicenseGraph {
    pub license: LocalLicense,
    pub customer: LocalCustomer,
}

impl LocalLicenseGraph {
    pub fn is_subscription(&self) -> bool {
        matches!(
            self.license.origin,
            LocalLicenseOrigin::Subscription { .. }
        )
    }

    pub fn purchase_for_api(&self, user_id: u64, payment: &LocalPayment) -> PurchasePayload {
        PurchasePayload {
            user_id,
            license_key: self.license.key.clone(),
            expiration: self.license.expiration,
            payment: payment.payment_for_api(),
        }
    }

    pub fn subscription_for_api(
        &self,
        user_id: u64,
        subscription: &LocalSubscription,
    ) -> SubscriptionPayload {
        SubscriptionPayload {
            user_id,
            license_key: self.license.key.clone(),
            expiration: self.license.expiration,
            billing_cycle: subscription.billing_cycle_months,
            amount_per_cycle: subscription.amount_per_cycle,
            next_payment: subscription.next_payment_at,
            gateway: subscription.gateway.clone(),
            external_id: subscription.external_id.clone(),
            created: subscription.created_at,
        }
    }
}

/// A subscription looked up on its own, as renewal webhooks do.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSubscriptionRecord {
    pub module_id: String,
    pub license_id: String,
    pub subscription: LocalSubscription,
}

/// Site facts reported by the client plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiteDescriptor {
    pub uid: String,
    pub url: String,
    pub title: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub charset: Option<String>,
    pub platform_version: String,
    pub programming_language_version: String,
    pub module_version: String,
    pub is_premium: bool,
}

/// A site activation of a local module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInstall {
    pub module_id: String,
    pub site: SiteDescriptor,
}

impl LocalInstall {
    pub fn new(module_id: impl Into<String>, site: SiteDescriptor) -> Self {
        Self {
            module_id: module_id.into(),
            site,
        }
    }

    /// Stable identity of this module on this site: the same product on the
    /// same URL always yields the same id, regardless of scheme or `www.`.
    pub fn local_install_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.module_id.as_bytes());
        hasher.update(b"|");
        hasher.update(canonical_site_url(&self.site.url).as_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn install_for_api(&self) -> InstallPayload {
        InstallPayload {
            uid: self.site.uid.clone(),
            url: self.site.url.trim().to_string(),
            title: self.site.title.clone(),
            language: self.site.language.clone(),
            charset: self.site.charset.clone(),
            platform_version: self.site.platform_version.clone(),
            programming_language_version: self.site.programming_language_version.clone(),
            version: self.site.module_version.clone(),
            is_premium: self.site.is_premium,
            is_active: true,
        }
    }
}

pub fn canonical_site_url(url: &str) -> String {
    let lowered = url.trim().to_ascii_lowercase();
    let without_scheme = lowered
        .split_once("://")
        .map_or(lowered.as_str(), |(_, rest)| rest);
    let without_www = without_scheme
        .strip_prefix("www.")
        .unwrap_or(without_scheme);
    without_www.trim_end_matches('/').to_string()
}
