use std::future::Future;
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::MigrationError;
use super::request::{LicenseSelector, MigrationRequest, MigrationTarget, NetworkSite};
use crate::engine::{SyncError, require_remote_id};
use crate::licensing::{LicenseContext, LicenseMigration, MigratedCustomer, RenewalOutcome};
use crate::mapping::{EntityMapper, EntityType, LinkOutcome};
use crate::remote::RemoteInstall;
use crate::source::{
    LicenseStatus, LocalInstall, LocalLicenseGraph, LocalModule, LocalPayment, SiteDescriptor,
    SourcePlatform,
};

/// Claims older than this are assumed to belong to a request that died.
const CLAIM_TTL_SECS: i64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BundleKind {
    #[serde(rename = "bundle")]
    Bundle,
    #[serde(rename = "add-on")]
    AddOn,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MigrationResponse {
    Site {
        user: MigratedCustomer,
        install: RemoteInstall,
    },
    Network {
        user: MigratedCustomer,
        installs: Vec<RemoteInstall>,
        skipped_sites: Vec<String>,
    },
    Bundle {
        user: MigratedCustomer,
        #[serde(rename = "type")]
        kind: BundleKind,
        license_key: String,
    },
}

struct BundleMigration {
    kind: BundleKind,
    graph: LocalLicenseGraph,
    user: MigratedCustomer,
}

struct NetworkGroup {
    graph: LocalLicenseGraph,
    user: Option<MigratedCustomer>,
    /// Output slot and site, in request order.
    sites: Vec<(usize, SiteDescriptor)>,
}

enum ResolvedSelector {
    License(LocalLicenseGraph),
    Bundle(Vec<String>),
}

/// Validates migration requests from client sites and drives the license
/// engine for them.
#[derive(Clone)]
pub struct MigrationEndpoint {
    mapper: EntityMapper,
    source: Arc<dyn SourcePlatform>,
    licenses: LicenseMigration,
}

impl MigrationEndpoint {
    pub fn new(
        mapper: EntityMapper,
        source: Arc<dyn SourcePlatform>,
        licenses: LicenseMigration,
    ) -> Self {
        Self {
            mapper,
            source,
            licenses,
        }
    }

    pub async fn migrate(
        &self,
        remote_module_id: u64,
        request: MigrationRequest,
    ) -> Result<MigrationResponse, MigrationError> {
        let target = request.validate()?;
        let module = self.resolve_module(remote_module_id).await?;

        match target {
            MigrationTarget::Site {
                site,
                selector: LicenseSelector::Key(key),
            } => self.migrate_site(remote_module_id, &module, site, &key).await,
            MigrationTarget::Site {
                selector: LicenseSelector::Bundle(children),
                ..
            } => {
                let bundle = self
                    .migrate_bundle(remote_module_id, &module, &children)
                    .await?;
                Ok(MigrationResponse::Bundle {
                    user: bundle.user,
                    kind: bundle.kind,
                    license_key: bundle.graph.license.key,
                })
            }
            MigrationTarget::Network { sites } => {
                self.migrate_network(remote_module_id, &module, sites)
                    .await
            }
        }
    }

    /// Applies a renewal charge reported by the storefront.
    pub async fn migrate_renewal(
        &self,
        remote_module_id: u64,
        local_subscription_id: &str,
        payment: &LocalPayment,
    ) -> Result<RenewalOutcome, MigrationError> {
        let module = self.resolve_module(remote_module_id).await?;
        let record = self
            .source
            .subscription(local_subscription_id)
            .await?
            .ok_or_else(|| {
                MigrationError::NotFound(format!(
                    "subscription `{local_subscription_id}` does not exist"
                ))
            })?;
        if record.module_id != module.local_id() {
            return Err(MigrationError::InvalidRequest(format!(
                "subscription `{local_subscription_id}` belongs to another module"
            )));
        }
        Ok(self
            .licenses
            .migrate_subscription_renewal(remote_module_id, local_subscription_id, payment)
            .await?)
    }

    async fn resolve_module(&self, remote_module_id: u64) -> Result<LocalModule, MigrationError> {
        let record = self
            .mapper
            .get_by_remote(EntityType::Module, remote_module_id)
            .await?
            .ok_or(MigrationError::InvalidModuleId(remote_module_id))?;
        self.source
            .module(&record.local_id)
            .await?
            .ok_or(MigrationError::InvalidModuleId(remote_module_id))
    }

    async fn load_license(
        &self,
        module: &LocalModule,
        license_key: &str,
    ) -> Result<LocalLicenseGraph, MigrationError> {
        let license_key = license_key.trim();
        if license_key.is_empty() {
            return Err(MigrationError::EmptyLicenseKey);
        }
        let graph = self
            .source
            .license_by_key(module.local_id(), license_key)
            .await?
            .ok_or(MigrationError::InvalidLicenseKey)?;
        check_license_state(&graph)?;
        Ok(graph)
    }

    async fn migrate_site(
        &self,
        remote_module_id: u64,
        module: &LocalModule,
        site: SiteDescriptor,
        license_key: &str,
    ) -> Result<MigrationResponse, MigrationError> {
        let graph = self.load_license(module, license_key).await?;
        let claim = format!("{}:{}", graph.license.id, site.uid);
        let ctx = LicenseContext {
            remote_module_id,
            module,
            graph: &graph,
        };
        let installs = [LocalInstall::new(module.local_id(), site)];

        self.with_claim(&claim, async {
            let customer = self.licenses.migrate_license(&ctx).await?;
            let mut migrated = self
                .licenses
                .migrate_installs(&ctx, &installs, customer)
                .await?;
            let install = migrated
                .installs
                .pop()
                .ok_or(SyncError::MissingRemoteField("installs"))?;
            Ok(MigrationResponse::Site {
                user: migrated.user,
                install,
            })
        })
        .await
    }

    /// The bundle license wins over its add-ons. Add-ons are tried in
    /// request order only when there is no bundle license or it failed.
    async fn migrate_bundle(
        &self,
        remote_module_id: u64,
        module: &LocalModule,
        children: &[String],
    ) -> Result<BundleMigration, MigrationError> {
        let mut candidates = Vec::with_capacity(children.len());
        let mut first_error = None;
        for key in children {
            match self.load_license(module, key).await {
                Ok(graph) => candidates.push(graph),
                Err(error) => {
                    debug!(license_key = %key, reason = %error, "add-on key rejected");
                    first_error.get_or_insert(error);
                }
            }
        }
        if candidates.is_empty() {
            return Err(first_error.unwrap_or(MigrationError::NoLicenseKeys));
        }

        let parent_key = candidates
            .iter()
            .find_map(|graph| graph.license.parent_license_key.clone());
        if let Some(parent_key) = parent_key {
            match self.migrate_bundle_parent(&parent_key).await {
                Ok(migrated) => return Ok(migrated),
                Err(MigrationError::MigrationInProgress) => {
                    return Err(MigrationError::MigrationInProgress);
                }
                Err(error) => warn!(
                    parent_license_key = %parent_key,
                    reason = %error,
                    "bundle license migration failed; trying add-on licenses"
                ),
            }
        }

        let mut last_error = None;
        for graph in candidates {
            let claim = format!("{}:bundle", graph.license.id);
            let ctx = LicenseContext {
                remote_module_id,
                module,
                graph: &graph,
            };
            let result = self
                .with_claim(&claim, async {
                    Ok(self.licenses.migrate_license(&ctx).await?)
                })
                .await;
            match result {
                Ok(user) => {
                    return Ok(BundleMigration {
                        kind: BundleKind::AddOn,
                        graph,
                        user,
                    });
                }
                Err(MigrationError::MigrationInProgress) => {
                    return Err(MigrationError::MigrationInProgress);
                }
                Err(error) => {
                    warn!(
                        license_id = %graph.license.id,
                        reason = %error,
                        "add-on license migration failed"
                    );
                    last_error = Some(error);
                }
            }
        }
        Err(last_error.unwrap_or(MigrationError::NoLicenseKeys))
    }

    async fn migrate_bundle_parent(
        &self,
        parent_key: &str,
    ) -> Result<BundleMigration, MigrationError> {
        let graph = self
            .source
            .find_license(parent_key)
            .await?
            .ok_or(MigrationError::InvalidLicenseKey)?;
        check_license_state(&graph)?;
        let bundle_module = self
            .source
            .module(&graph.license.module_id)
            .await?
            .ok_or_else(|| {
                MigrationError::Internal(format!(
                    "bundle module `{}` is missing from the storefront",
                    graph.license.module_id
                ))
            })?;
        let remote_module_id =
            require_remote_id(&self.mapper, EntityType::Module, bundle_module.local_id()).await?;

        let claim = format!("{}:bundle", graph.license.id);
        let ctx = LicenseContext {
            remote_module_id,
            module: &bundle_module,
            graph: &graph,
        };
        let user = self
            .with_claim(&claim, async {
                Ok(self.licenses.migrate_license(&ctx).await?)
            })
            .await?;
        Ok(BundleMigration {
            kind: BundleKind::Bundle,
            graph,
            user,
        })
    }

    /// Sites sharing a license are activated together in one batch. Every
    /// plain key is validated before anything is migrated.
    async fn migrate_network(
        &self,
        remote_module_id: u64,
        module: &LocalModule,
        sites: Vec<NetworkSite>,
    ) -> Result<MigrationResponse, MigrationError> {
        let mut skipped_sites = Vec::new();
        let mut keyed = Vec::with_capacity(sites.len());
        for network_site in sites {
            let resolved = match network_site.selector {
                None => {
                    skipped_sites.push(network_site.site.uid);
                    continue;
                }
                Some(LicenseSelector::Key(key)) => {
                    ResolvedSelector::License(self.load_license(module, &key).await?)
                }
                Some(LicenseSelector::Bundle(children)) => ResolvedSelector::Bundle(children),
            };
            keyed.push((network_site.site, resolved));
        }

        let slots = keyed.len();
        let mut groups: Vec<NetworkGroup> = Vec::new();
        for (slot, (site, resolved)) in keyed.into_iter().enumerate() {
            let (graph, user) = match resolved {
                ResolvedSelector::License(graph) => (graph, None),
                ResolvedSelector::Bundle(children) => {
                    let bundle = self
                        .migrate_bundle(remote_module_id, module, &children)
                        .await?;
                    (bundle.graph, Some(bundle.user))
                }
            };
            match groups
                .iter_mut()
                .find(|group| group.graph.license.id == graph.license.id)
            {
                Some(group) => {
                    if group.user.is_none() {
                        group.user = user;
                    }
                    group.sites.push((slot, site));
                }
                None => groups.push(NetworkGroup {
                    graph,
                    user,
                    sites: vec![(slot, site)],
                }),
            }
        }

        let mut installs: Vec<Option<RemoteInstall>> = vec![None; slots];
        let mut network_user = None;
        for group in groups {
            let claim = format!("{}:network", group.graph.license.id);
            let ctx = LicenseContext {
                remote_module_id,
                module,
                graph: &group.graph,
            };
            let local_installs = group
                .sites
                .iter()
                .map(|(_, site)| LocalInstall::new(module.local_id(), site.clone()))
                .collect::<Vec<_>>();
            let preselected = group.user.clone();

            let migrated = self
                .with_claim(&claim, async {
                    let customer = match preselected {
                        Some(customer) => customer,
                        None => self.licenses.migrate_license(&ctx).await?,
                    };
                    Ok(self
                        .licenses
                        .migrate_installs(&ctx, &local_installs, customer)
                        .await?)
                })
                .await?;

            for ((slot, _), install) in group.sites.iter().zip(migrated.installs) {
                installs[*slot] = Some(install);
            }
            if network_user.is_none() {
                network_user = Some(migrated.user);
            }
        }

        let user = network_user.ok_or(MigrationError::NoLicenseKeys)?;
        let installs = installs
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(SyncError::MissingRemoteField("installs"))?;
        info!(
            remote_module_id,
            installs = installs.len(),
            skipped = skipped_sites.len(),
            "network migrated"
        );
        Ok(MigrationResponse::Network {
            user,
            installs,
            skipped_sites,
        })
    }

    /// Runs `work` while holding the claim `key`; a concurrent holder makes
    /// this fail with [`MigrationError::MigrationInProgress`].
    async fn with_claim<T, F>(&self, key: &str, work: F) -> Result<T, MigrationError>
    where
        F: Future<Output = Result<T, MigrationError>>,
    {
        let token = self.claim(key).await?;
        let result = work.await;
        self.release(key, token).await;
        result
    }

    /// Returns the token stored in the claim; only its holder releases it.
    pub(super) async fn claim(&self, key: &str) -> Result<u64, MigrationError> {
        let token = claim_token();
        match self
            .mapper
            .link_if_absent(EntityType::MigrationClaim, key, token)
            .await?
        {
            LinkOutcome::Inserted(_) => Ok(token),
            LinkOutcome::Existing(record) => {
                if Utc::now() - record.updated_at < Duration::seconds(CLAIM_TTL_SECS) {
                    info!(claim = key, "duplicate migration request rejected");
                    return Err(MigrationError::MigrationInProgress);
                }
                warn!(
                    claim = key,
                    claimed_at = %record.updated_at,
                    "taking over stale migration claim"
                );
                self.mapper
                    .link(EntityType::MigrationClaim, key, token)
                    .await?;
                Ok(token)
            }
        }
    }

    pub(super) async fn release(&self, key: &str, token: u64) {
        match self
            .mapper
            .unlink_if_remote(EntityType::MigrationClaim, key, token)
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(claim = key, "claim was taken over; leaving it in place"),
            Err(error) => {
                warn!(claim = key, reason = %error, "failed to release migration claim");
            }
        }
    }
}

/// Random and within BIGINT range.
fn claim_token() -> u64 {
    (Uuid::new_v4().as_u64_pair().0 >> 1).max(1)
}

fn check_license_state(graph: &LocalLicenseGraph) -> Result<(), MigrationError> {
    if graph.license.status == LicenseStatus::Disabled {
        return Err(MigrationError::LicenseDisabled);
    }
    if graph.license.is_expired_at(Utc::now()) {
        return Err(MigrationError::LicenseExpired);
    }
    Ok(())
}
