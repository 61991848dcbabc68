use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const FREE_PLAN_NAME: &str = "free";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteModule {
    pub id: u64,
    pub slug: String,
    #[serde(default)]
    pub title: String,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePlan {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub title: String,
}

impl RemotePlan {
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.name == FREE_PLAN_NAME
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePricing {
    pub id: u64,
    #[serde(default)]
    pub plan_id: Option<u64>,
    /// `None` is the unlimited-sites tier.
    #[serde(default)]
    pub licenses: Option<u32>,
    #[serde(default)]
    pub monthly_price: Option<f64>,
    #[serde(default)]
    pub annual_price: Option<f64>,
    #[serde(default)]
    pub lifetime_price: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteUser {
    pub id: u64,
    pub email: String,
    #[serde(default)]
    pub first: Option<String>,
    #[serde(default)]
    pub last: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteBilling {
    pub id: u64,
    #[serde(default)]
    pub user_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemotePayment {
    pub id: u64,
    #[serde(default)]
    pub user_id: Option<u64>,
    #[serde(default)]
    pub license_id: Option<u64>,
    #[serde(default)]
    pub subscription_id: Option<u64>,
    #[serde(default)]
    pub gross: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSubscription {
    pub id: u64,
    #[serde(default)]
    pub user_id: Option<u64>,
    #[serde(default)]
    pub license_id: Option<u64>,
    #[serde(default)]
    pub plan_id: Option<u64>,
    #[serde(default)]
    pub pricing_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteInstall {
    pub id: u64,
    #[serde(default)]
    pub user_id: Option<u64>,
    #[serde(default)]
    pub license_id: Option<u64>,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub is_premium: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModulePayload {
    pub slug: String,
    pub title: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanPayload {
    pub name: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PricingPayload {
    pub licenses: Option<u32>,
    pub monthly_price: Option<f64>,
    pub annual_price: Option<f64>,
    pub lifetime_price: Option<f64>,
    pub currency: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserPayload {
    pub email: String,
    pub first: String,
    pub last: String,
    pub is_verified: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BillingPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_name: Option<String>,
    pub first: String,
    pub last: String,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    pub address_street: String,
    pub address_city: String,
    pub address_zip: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address_state: Option<String>,
    pub address_country_code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentPayload {
    pub gross: f64,
    pub tax: f64,
    pub gateway: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub created: DateTime<Utc>,
    pub is_sandbox: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PurchasePayload {
    pub user_id: u64,
    pub license_key: String,
    pub expiration: Option<DateTime<Utc>>,
    pub payment: PaymentPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubscriptionPayload {
    pub user_id: u64,
    pub license_key: String,
    pub expiration: Option<DateTime<Utc>>,
    /// Months between charges; `12` for annual.
    pub billing_cycle: u32,
    pub amount_per_cycle: f64,
    pub next_payment: Option<DateTime<Utc>>,
    pub gateway: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub created: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallPayload {
    pub uid: String,
    pub url: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
    pub platform_version: String,
    pub programming_language_version: String,
    pub version: String,
    pub is_premium: bool,
    pub is_active: bool,
}
