use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::{
    LocalCustomer, LocalLicense, LocalLicenseGraph, LocalLicenseOrigin, LocalModule,
    LocalSubscriptionRecord,
};
use super::{SourceError, SourcePlatform};

/// On-disk shape of a storefront export.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorefrontExport {
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub modules: Vec<LocalModule>,
    #[serde(default)]
    pub customers: Vec<LocalCustomer>,
    #[serde(default)]
    pub licenses: Vec<LocalLicense>,
}

/// [`SourcePlatform`] backed by a JSON export of the storefront database.
#[derive(Debug, Clone)]
pub struct ExportedStorefront {
    namespace: String,
    modules: Vec<LocalModule>,
    customers: HashMap<String, LocalCustomer>,
    licenses: Vec<LocalLicense>,
}

impl ExportedStorefront {
    pub fn empty(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            modules: Vec::new(),
            customers: HashMap::new(),
            licenses: Vec::new(),
        }
    }

    pub fn from_path(path: &Path, namespace: &str) -> Result<Self, SourceError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|error| SourceError::Io(format!("{}: {error}", path.display())))?;
        Self::from_json(&raw, namespace)
    }

    pub fn from_json(raw: &str, namespace: &str) -> Result<Self, SourceError> {
        let export: StorefrontExport =
            serde_json::from_str(raw).map_err(|error| SourceError::Parse(error.to_string()))?;
        Self::from_export(export, namespace)
    }

    /// Validates cross references once so lookups never meet a dangling id.
    pub fn from_export(export: StorefrontExport, namespace: &str) -> Result<Self, SourceError> {
        if let Some(declared) = export.namespace.as_deref()
            && declared != namespace
        {
            return Err(SourceError::Inconsistent(format!(
                "export belongs to namespace `{declared}`, expected `{namespace}`"
            )));
        }

        let mut module_ids = std::collections::HashSet::new();
        for module in &export.modules {
            if !module_ids.insert(module.id.as_str()) {
                return Err(SourceError::Inconsistent(format!(
                    "duplicate module id `{}`",
                    module.id
                )));
            }
        }

        let mut customers = HashMap::with_capacity(export.customers.len());
        for customer in export.customers {
            let id = customer.id.clone();
            if customers.insert(id.clone(), customer).is_some() {
                return Err(SourceError::Inconsistent(format!(
                    "duplicate customer id `{id}`"
                )));
            }
        }

        for license in &export.licenses {
            if !customers.contains_key(&license.customer_id) {
                return Err(SourceError::Inconsistent(format!(
                    "license `{}` references unknown customer `{}`",
                    license.id, license.customer_id
                )));
            }
            if !module_ids.contains(license.module_id.as_str()) {
                return Err(SourceError::Inconsistent(format!(
                    "license `{}` references unknown module `{}`",
                    license.id, license.module_id
                )));
            }
        }

        Ok(Self {
            namespace: namespace.to_string(),
            modules: export.modules,
            customers,
            licenses: export.licenses,
        })
    }

    fn graph(&self, license: &LocalLicense) -> Result<LocalLicenseGraph, SourceError> {
        let customer = self
            .customers
            .get(&license.customer_id)
            .cloned()
            .ok_or_else(|| {
                SourceError::Inconsistent(format!(
                    "license `{}` references unknown customer `{}`",
                    license.id, license.customer_id
                ))
            })?;
        Ok(LocalLicenseGraph {
            license: license.clone(),
            customer,
        })
    }
}

#[async_trait]
impl SourcePlatform for ExportedStorefront {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn module(&self, local_module_id: &str) -> Result<Option<LocalModule>, SourceError> {
        Ok(self
            .modules
            .iter()
            .find(|module| module.id == local_module_id)
            .cloned())
    }

    async fn modules(&self) -> Result<Vec<LocalModule>, SourceError> {
        Ok(self.modules.clone())
    }

    async fn license_by_key(
        &self,
        local_module_id: &str,
        license_key: &str,
    ) -> Result<Option<LocalLicenseGraph>, SourceError> {
        let key = license_key.trim();
        self.licenses
            .iter()
            .find(|license| {
                license.module_id == local_module_id && license.key.eq_ignore_ascii_case(key)
            })
            .map(|license| self.graph(license))
            .transpose()
    }

    async fn find_license(
        &self,
        license_key: &str,
    ) -> Result<Option<LocalLicenseGraph>, SourceError> {
        let key = license_key.trim();
        self.licenses
            .iter()
            .find(|license| license.key.eq_ignore_ascii_case(key))
            .map(|license| self.graph(license))
            .transpose()
    }

    async fn subscription(
        &self,
        local_subscription_id: &str,
    ) -> Result<Option<LocalSubscriptionRecord>, SourceError> {
        Ok(self.licenses.iter().find_map(|license| match &license.origin {
            LocalLicenseOrigin::Subscription { subscription, .. }
                if subscription.id == local_subscription_id =>
            {
                Some(LocalSubscriptionRecord {
                    module_id: license.module_id.clone(),
                    license_id: license.id.clone(),
                    subscription: subscription.clone(),
                })
            }
            _ => None,
        }))
    }
}
