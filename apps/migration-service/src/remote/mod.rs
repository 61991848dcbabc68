//! Typed calls against the licensing platform.
//!
//! Every method is one HTTP round trip through [`RemoteApi`]; nothing here
//! retries or caches. Paths are relative to the developer scope the client
//! was configured with.

pub mod types;

use std::sync::Arc;

use licensing_api_client::{ApiError, HttpMethod, RemoteApi, codes};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

pub use types::{
    BillingPayload, FREE_PLAN_NAME, InstallPayload, ModulePayload, PaymentPayload, PlanPayload,
    PricingPayload, PurchasePayload, RemoteBilling, RemoteInstall, RemoteModule, RemotePayment,
    RemotePlan, RemotePricing, RemoteSubscription, RemoteUser, SubscriptionPayload, UserPayload,
};

#[derive(Clone)]
pub struct LicensingRemote {
    api: Arc<dyn RemoteApi>,
}

impl LicensingRemote {
    pub fn new(api: Arc<dyn RemoteApi>) -> Self {
        Self { api }
    }

    pub async fn find_module_by_slug(&self, slug: &str) -> Result<Option<RemoteModule>, ApiError> {
        #[derive(serde::Deserialize)]
        struct Modules {
            #[serde(default)]
            plugins: Vec<RemoteModule>,
        }

        let modules: Modules = self
            .send("/plugins.json", HttpMethod::Get, json!({ "slug": slug }))
            .await?;
        Ok(modules.plugins.into_iter().find(|module| module.slug == slug))
    }

    pub async fn create_module(&self, payload: &ModulePayload) -> Result<RemoteModule, ApiError> {
        self.send("/plugins.json", HttpMethod::Post, to_params(payload)?)
            .await
    }

    pub async fn list_plans(&self, module_id: u64) -> Result<Vec<RemotePlan>, ApiError> {
        #[derive(serde::Deserialize)]
        struct Plans {
            #[serde(default)]
            plans: Vec<RemotePlan>,
        }

        let plans: Plans = self
            .send(&plans_path(module_id), HttpMethod::Get, json!({}))
            .await?;
        Ok(plans.plans)
    }

    pub async fn create_plan(
        &self,
        module_id: u64,
        payload: &PlanPayload,
    ) -> Result<RemotePlan, ApiError> {
        self.send(&plans_path(module_id), HttpMethod::Post, to_params(payload)?)
            .await
    }

    pub async fn delete_plan(&self, module_id: u64, plan_id: u64) -> Result<(), ApiError> {
        self.api
            .call(
                &format!("/plugins/{module_id}/plans/{plan_id}.json"),
                HttpMethod::Delete,
                json!({}),
            )
            .await
            .map(|_| ())
    }

    pub async fn list_pricing(
        &self,
        module_id: u64,
        plan_id: u64,
    ) -> Result<Vec<RemotePricing>, ApiError> {
        #[derive(serde::Deserialize)]
        struct Pricing {
            #[serde(default)]
            pricing: Vec<RemotePricing>,
        }

        let pricing: Pricing = self
            .send(
                &pricing_path(module_id, plan_id),
                HttpMethod::Get,
                json!({}),
            )
            .await?;
        Ok(pricing.pricing)
    }

    pub async fn create_pricing(
        &self,
        module_id: u64,
        plan_id: u64,
        payload: &PricingPayload,
    ) -> Result<RemotePricing, ApiError> {
        self.send(
            &pricing_path(module_id, plan_id),
            HttpMethod::Post,
            to_params(payload)?,
        )
        .await
    }

    /// Fails with [`codes::USER_EXIST`] when the email is already registered.
    pub async fn create_user(
        &self,
        module_id: u64,
        payload: &UserPayload,
    ) -> Result<RemoteUser, ApiError> {
        self.send(&users_path(module_id), HttpMethod::Post, to_params(payload)?)
            .await
    }

    pub async fn find_user_by_email(
        &self,
        module_id: u64,
        email: &str,
    ) -> Result<Option<RemoteUser>, ApiError> {
        #[derive(serde::Deserialize)]
        struct Users {
            #[serde(default)]
            users: Vec<RemoteUser>,
        }

        let users: Users = self
            .send(
                &users_path(module_id),
                HttpMethod::Get,
                json!({ "email": email }),
            )
            .await?;
        Ok(users
            .users
            .into_iter()
            .find(|user| user.email.eq_ignore_ascii_case(email)))
    }

    pub async fn get_billing(
        &self,
        module_id: u64,
        user_id: u64,
    ) -> Result<Option<RemoteBilling>, ApiError> {
        match self
            .send(
                &billing_path(module_id, user_id),
                HttpMethod::Get,
                json!({}),
            )
            .await
        {
            Ok(billing) => Ok(Some(billing)),
            Err(error) if error.is(codes::NOT_FOUND) || error.http == 404 => Ok(None),
            Err(error) => Err(error),
        }
    }

    pub async fn put_billing(
        &self,
        module_id: u64,
        user_id: u64,
        payload: &BillingPayload,
    ) -> Result<RemoteBilling, ApiError> {
        self.send(
            &billing_path(module_id, user_id),
            HttpMethod::Put,
            to_params(payload)?,
        )
        .await
    }

    /// The returned payment carries the id of the license the purchase created.
    pub async fn create_purchase(
        &self,
        module_id: u64,
        plan_id: u64,
        pricing_id: u64,
        payload: &PurchasePayload,
    ) -> Result<RemotePayment, ApiError> {
        self.send(
            &format!(
                "{}/{pricing_id}/purchases.json",
                pricing_base(module_id, plan_id)
            ),
            HttpMethod::Post,
            to_params(payload)?,
        )
        .await
    }

    pub async fn get_payment(
        &self,
        module_id: u64,
        payment_id: u64,
    ) -> Result<RemotePayment, ApiError> {
        self.send(
            &format!("/plugins/{module_id}/payments/{payment_id}.json"),
            HttpMethod::Get,
            json!({}),
        )
        .await
    }

    pub async fn create_subscription(
        &self,
        module_id: u64,
        plan_id: u64,
        pricing_id: u64,
        payload: &SubscriptionPayload,
    ) -> Result<RemoteSubscription, ApiError> {
        self.send(
            &format!(
                "{}/{pricing_id}/subscriptions.json",
                pricing_base(module_id, plan_id)
            ),
            HttpMethod::Post,
            to_params(payload)?,
        )
        .await
    }

    pub async fn get_subscription(
        &self,
        module_id: u64,
        subscription_id: u64,
    ) -> Result<RemoteSubscription, ApiError> {
        self.send(
            &format!("/plugins/{module_id}/subscriptions/{subscription_id}.json"),
            HttpMethod::Get,
            json!({}),
        )
        .await
    }

    pub async fn create_subscription_payment(
        &self,
        module_id: u64,
        subscription_id: u64,
        payload: &PaymentPayload,
    ) -> Result<RemotePayment, ApiError> {
        self.send(
            &format!("/plugins/{module_id}/subscriptions/{subscription_id}/payments.json"),
            HttpMethod::Post,
            to_params(payload)?,
        )
        .await
    }

    /// Creates every install in one call. The response preserves request
    /// order.
    pub async fn create_installs(
        &self,
        module_id: u64,
        user_id: u64,
        license_id: u64,
        installs: &[InstallPayload],
    ) -> Result<Vec<RemoteInstall>, ApiError> {
        #[derive(serde::Deserialize)]
        struct Installs {
            #[serde(default)]
            installs: Vec<RemoteInstall>,
        }

        let created: Installs = self
            .send(
                &format!("/plugins/{module_id}/users/{user_id}/installs.json"),
                HttpMethod::Post,
                json!({
                    "license_id": license_id,
                    "installs": to_params(&installs)?,
                }),
            )
            .await?;
        if created.installs.len() != installs.len() {
            return Err(ApiError::decode(format!(
                "install batch returned {} entries for {} requested",
                created.installs.len(),
                installs.len()
            )));
        }
        Ok(created.installs)
    }

    /// Fails with [`codes::INSTALL_NOT_FOUND`] when the install was removed
    /// remotely.
    pub async fn get_install(
        &self,
        module_id: u64,
        install_id: u64,
    ) -> Result<RemoteInstall, ApiError> {
        self.send(
            &format!("/plugins/{module_id}/installs/{install_id}.json"),
            HttpMethod::Get,
            json!({}),
        )
        .await
    }

    pub async fn deactivate_license(
        &self,
        module_id: u64,
        install_id: u64,
        license_id: u64,
    ) -> Result<(), ApiError> {
        self.api
            .call(
                &install_license_path(module_id, install_id, license_id),
                HttpMethod::Delete,
                json!({}),
            )
            .await
            .map(|_| ())
    }

    pub async fn activate_license(
        &self,
        module_id: u64,
        install_id: u64,
        license_id: u64,
    ) -> Result<RemoteInstall, ApiError> {
        self.send(
            &install_license_path(module_id, install_id, license_id),
            HttpMethod::Put,
            json!({}),
        )
        .await
    }

    async fn send<T: DeserializeOwned>(
        &self,
        path: &str,
        method: HttpMethod,
        params: Value,
    ) -> Result<T, ApiError> {
        let value = self.api.call(path, method, params).await?;
        serde_json::from_value(value).map_err(|error| {
            ApiError::decode(format!(
                "unexpected {} {path} response: {error}",
                method.as_str()
            ))
        })
    }
}

fn to_params<P: Serialize + ?Sized>(payload: &P) -> Result<Value, ApiError> {
    serde_json::to_value(payload)
        .map_err(|error| ApiError::decode(format!("failed to encode request: {error}")))
}

fn plans_path(module_id: u64) -> String {
    format!("/plugins/{module_id}/plans.json")
}

fn pricing_base(module_id: u64, plan_id: u64) -> String {
    format!("/plugins/{module_id}/plans/{plan_id}/pricing")
}

fn pricing_path(module_id: u64, plan_id: u64) -> String {
    format!("{}.json", pricing_base(module_id, plan_id))
}

fn users_path(module_id: u64) -> String {
    format!("/plugins/{module_id}/users.json")
}

fn billing_path(module_id: u64, user_id: u64) -> String {
    format!("/plugins/{module_id}/users/{user_id}/billing.json")
}

fn install_license_path(module_id: u64, install_id: u64, license_id: u64) -> String {
    format!("/plugins/{module_id}/installs/{install_id}/licenses/{license_id}.json")
}
