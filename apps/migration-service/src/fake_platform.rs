//! In-memory licensing platform for tests.
//!
//! Implements [`RemoteApi`] over plain JSON state, records every call and
//! lets a test fail or override calls whose path contains a given needle.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use licensing_api_client::{ApiError, HttpMethod, RemoteApi, codes};
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub method: HttpMethod,
    pub path: String,
    pub params: Value,
}

struct Failure {
    method: HttpMethod,
    needle: String,
    skip: usize,
    seen: usize,
    error: ApiError,
}

struct Override {
    method: HttpMethod,
    needle: String,
    response: Value,
}

#[derive(Default)]
struct State {
    next_id: u64,
    calls: Vec<RecordedCall>,
    failures: Vec<Failure>,
    overrides: Vec<Override>,
    modules: Vec<Value>,
    plans: Vec<(u64, Value)>,
    pricing: Vec<(u64, Value)>,
    users: Vec<(u64, Value)>,
    billing: HashMap<u64, Value>,
    payments: HashMap<u64, Value>,
    subscriptions: HashMap<u64, Value>,
    installs: HashMap<u64, Value>,
}

impl State {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        1000 + self.next_id
    }

    fn create_plan(&mut self, module_id: u64, name: &str, title: &str) -> Value {
        let plan = json!({ "id": self.allocate(), "name": name, "title": title });
        self.plans.push((module_id, plan.clone()));
        plan
    }
}

pub struct FakePlatform {
    state: Mutex<State>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake platform lock")
    }

    pub fn seed_module(&self, slug: &str) -> u64 {
        let mut state = self.lock();
        let id = state.allocate();
        state
            .modules
            .push(json!({ "id": id, "slug": slug, "title": slug, "type": "plugin" }));
        id
    }

    pub fn seed_plan(&self, module_id: u64, name: &str) -> u64 {
        let mut state = self.lock();
        let plan = state.create_plan(module_id, name, name);
        plan["id"].as_u64().unwrap_or_default()
    }

    pub fn seed_pricing(&self, plan_id: u64, licenses: Option<u32>) -> u64 {
        let mut state = self.lock();
        let id = state.allocate();
        state.pricing.push((
            plan_id,
            json!({ "id": id, "plan_id": plan_id, "licenses": licenses, "annual_price": 49.0 }),
        ));
        id
    }

    pub fn seed_user(&self, module_id: u64, email: &str) -> u64 {
        let mut state = self.lock();
        let id = state.allocate();
        state
            .users
            .push((module_id, json!({ "id": id, "email": email })));
        id
    }

    pub fn remove_install(&self, install_id: u64) {
        self.lock().installs.remove(&install_id);
    }

    pub fn install(&self, install_id: u64) -> Option<Value> {
        self.lock().installs.get(&install_id).cloned()
    }

    pub fn plans(&self, module_id: u64) -> Vec<Value> {
        self.lock()
            .plans
            .iter()
            .filter(|(owner, _)| *owner == module_id)
            .map(|(_, plan)| plan.clone())
            .collect()
    }

    pub fn pricing(&self, plan_id: u64) -> Vec<Value> {
        self.lock()
            .pricing
            .iter()
            .filter(|(owner, _)| *owner == plan_id)
            .map(|(_, pricing)| pricing.clone())
            .collect()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn count(&self, method: HttpMethod, needle: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.method == method && call.path.contains(needle))
            .count()
    }

    /// Every matching call fails with `error`.
    pub fn fail_on(&self, method: HttpMethod, needle: &str, error: ApiError) {
        self.fail_after(method, needle, 0, error);
    }

    /// The first `skip` matching calls succeed; every later one fails.
    pub fn fail_after(&self, method: HttpMethod, needle: &str, skip: usize, error: ApiError) {
        self.lock().failures.push(Failure {
            method,
            needle: needle.to_string(),
            skip,
            seen: 0,
            error,
        });
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn respond_with(&self, method: HttpMethod, needle: &str, response: Value) {
        self.lock().overrides.push(Override {
            method,
            needle: needle.to_string(),
            response,
        });
    }
}

#[async_trait]
impl RemoteApi for FakePlatform {
    async fn call(&self, path: &str, method: HttpMethod, params: Value) -> Result<Value, ApiError> {
        let mut state = self.lock();
        state.calls.push(RecordedCall {
            method,
            path: path.to_string(),
            params: params.clone(),
        });

        for failure in &mut state.failures {
            if failure.method == method && path.contains(&failure.needle) {
                let seen = failure.seen;
                failure.seen += 1;
                if seen >= failure.skip {
                    return Err(failure.error.clone());
                }
            }
        }
        if let Some(found) = state
            .overrides
            .iter()
            .find(|entry| entry.method == method && path.contains(&entry.needle))
        {
            return Ok(found.response.clone());
        }

        let trimmed = path.trim_start_matches('/');
        let trimmed = trimmed.strip_suffix(".json").unwrap_or(trimmed);
        let segments = trimmed.split('/').collect::<Vec<_>>();
        route(&mut state, method, &segments, &params)
    }
}

fn route(
    state: &mut State,
    method: HttpMethod,
    segments: &[&str],
    params: &Value,
) -> Result<Value, ApiError> {
    use HttpMethod::{Delete, Get, Post, Put};

    match (method, segments) {
        (Get, ["plugins"]) => {
            let slug = params["slug"].as_str().unwrap_or_default();
            let plugins = state
                .modules
                .iter()
                .filter(|module| {
                    module["slug"]
                        .as_str()
                        .is_some_and(|candidate| candidate.contains(slug))
                })
                .cloned()
                .collect::<Vec<_>>();
            Ok(json!({ "plugins": plugins }))
        }
        (Post, ["plugins"]) => {
            let id = state.allocate();
            let module = json!({
                "id": id,
                "slug": params["slug"],
                "title": params["title"],
                "type": params["type"],
            });
            state.modules.push(module.clone());
            state.create_plan(id, "free", "Free");
            Ok(module)
        }
        (Get, ["plugins", module, "plans"]) => {
            let module = parse_id(module)?;
            let plans = state
                .plans
                .iter()
                .filter(|(owner, _)| *owner == module)
                .map(|(_, plan)| plan.clone())
                .collect::<Vec<_>>();
            Ok(json!({ "plans": plans }))
        }
        (Post, ["plugins", module, "plans"]) => {
            let module = parse_id(module)?;
            let name = params["name"].as_str().unwrap_or_default().to_string();
            let title = params["title"].as_str().unwrap_or_default().to_string();
            Ok(state.create_plan(module, &name, &title))
        }
        (Delete, ["plugins", _, "plans", plan]) => {
            let plan = parse_id(plan)?;
            let before = state.plans.len();
            state.plans.retain(|(_, entry)| entry["id"] != plan);
            if state.plans.len() == before {
                return Err(not_found("plan"));
            }
            Ok(json!({}))
        }
        (Get, ["plugins", _, "plans", plan, "pricing"]) => {
            let plan = parse_id(plan)?;
            let pricing = state
                .pricing
                .iter()
                .filter(|(owner, _)| *owner == plan)
                .map(|(_, entry)| entry.clone())
                .collect::<Vec<_>>();
            Ok(json!({ "pricing": pricing }))
        }
        (Post, ["plugins", _, "plans", plan, "pricing"]) => {
            let plan = parse_id(plan)?;
            let mut pricing = params.clone();
            pricing["id"] = json!(state.allocate());
            pricing["plan_id"] = json!(plan);
            state.pricing.push((plan, pricing.clone()));
            Ok(pricing)
        }
        (Post, ["plugins", _, "plans", plan, "pricing", pricing, "purchases"]) => {
            let (_plan, _pricing) = (parse_id(plan)?, parse_id(pricing)?);
            let license_id = state.allocate();
            let id = state.allocate();
            let payment = json!({
                "id": id,
                "user_id": params["user_id"],
                "license_id": license_id,
                "gross": params["payment"]["gross"],
            });
            state.payments.insert(id, payment.clone());
            Ok(payment)
        }
        (Post, ["plugins", _, "plans", plan, "pricing", pricing, "subscriptions"]) => {
            let (plan, pricing) = (parse_id(plan)?, parse_id(pricing)?);
            let license_id = state.allocate();
            let id = state.allocate();
            let subscription = json!({
                "id": id,
                "user_id": params["user_id"],
                "license_id": license_id,
                "plan_id": plan,
                "pricing_id": pricing,
            });
            state.subscriptions.insert(id, subscription.clone());
            Ok(subscription)
        }
        (Get, ["plugins", module, "users"]) => {
            let module = parse_id(module)?;
            let email = params["email"].as_str().unwrap_or_default();
            let users = state
                .users
                .iter()
                .filter(|(owner, user)| *owner == module && user["email"] == email)
                .map(|(_, user)| user.clone())
                .collect::<Vec<_>>();
            Ok(json!({ "users": users }))
        }
        (Post, ["plugins", module, "users"]) => {
            let module = parse_id(module)?;
            let email = params["email"].clone();
            if state
                .users
                .iter()
                .any(|(owner, user)| *owner == module && user["email"] == email)
            {
                return Err(ApiError::new(
                    codes::USER_EXIST,
                    "a user with this email already exists",
                    400,
                ));
            }
            let user = json!({
                "id": state.allocate(),
                "email": email,
                "first": params["first"],
                "last": params["last"],
            });
            state.users.push((module, user.clone()));
            Ok(user)
        }
        (Get, ["plugins", _, "users", user, "billing"]) => {
            let user = parse_id(user)?;
            state
                .billing
                .get(&user)
                .cloned()
                .ok_or_else(|| not_found("billing"))
        }
        (Put, ["plugins", _, "users", user, "billing"]) => {
            let user = parse_id(user)?;
            let id = state.allocate();
            let billing = json!({ "id": id, "user_id": user });
            state.billing.insert(user, billing.clone());
            Ok(billing)
        }
        (Post, ["plugins", _, "users", user, "installs"]) => {
            let user = parse_id(user)?;
            let license_id = params["license_id"].clone();
            let requested = params["installs"].as_array().cloned().unwrap_or_default();
            let mut created = Vec::with_capacity(requested.len());
            for install in requested {
                let id = state.allocate();
                let install = json!({
                    "id": id,
                    "user_id": user,
                    "license_id": license_id,
                    "uid": install["uid"],
                    "url": install["url"],
                    "title": install["title"],
                    "version": install["version"],
                    "is_premium": install["is_premium"],
                });
                state.installs.insert(id, install.clone());
                created.push(install);
            }
            Ok(json!({ "installs": created }))
        }
        (Get, ["plugins", _, "payments", payment]) => {
            let payment = parse_id(payment)?;
            state
                .payments
                .get(&payment)
                .cloned()
                .ok_or_else(|| not_found("payment"))
        }
        (Get, ["plugins", _, "subscriptions", subscription]) => {
            let subscription = parse_id(subscription)?;
            state
                .subscriptions
                .get(&subscription)
                .cloned()
                .ok_or_else(|| not_found("subscription"))
        }
        (Post, ["plugins", _, "subscriptions", subscription, "payments"]) => {
            let subscription = parse_id(subscription)?;
            let license_id = state
                .subscriptions
                .get(&subscription)
                .map(|entry| entry["license_id"].clone())
                .ok_or_else(|| not_found("subscription"))?;
            let id = state.allocate();
            let payment = json!({
                "id": id,
                "subscription_id": subscription,
                "license_id": license_id,
                "gross": params["gross"],
            });
            state.payments.insert(id, payment.clone());
            Ok(payment)
        }
        (Get, ["plugins", _, "installs", install]) => {
            let install = parse_id(install)?;
            state.installs.get(&install).cloned().ok_or_else(|| {
                ApiError::new(codes::INSTALL_NOT_FOUND, "install not found", 404)
            })
        }
        (Delete, ["plugins", _, "installs", install, "licenses", _]) => {
            let install = parse_id(install)?;
            let entry = state
                .installs
                .get_mut(&install)
                .ok_or_else(|| not_found("install"))?;
            entry["license_id"] = Value::Null;
            Ok(entry.clone())
        }
        (Put, ["plugins", _, "installs", install, "licenses", license]) => {
            let (install, license) = (parse_id(install)?, parse_id(license)?);
            let entry = state
                .installs
                .get_mut(&install)
                .ok_or_else(|| not_found("install"))?;
            entry["license_id"] = json!(license);
            Ok(entry.clone())
        }
        _ => Err(not_found("route")),
    }
}

fn parse_id(raw: &str) -> Result<u64, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::new("invalid_id", format!("`{raw}` is not an id"), 400))
}

fn not_found(what: &str) -> ApiError {
    ApiError::new(codes::NOT_FOUND, format!("{what} not found"), 404)
}
