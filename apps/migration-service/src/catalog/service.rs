use std::collections::HashSet;

use serde::Serialize;
use tracing::info;

use crate::engine::{SyncError, link_created};
use crate::mapping::{EntityMapper, EntityType};
use crate::remote::{LicensingRemote, RemotePlan, RemotePricing};
use crate::source::{LocalModule, LocalPricing};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    /// Already mapped; nothing was read or written remotely.
    Reused,
    /// Found remotely and mapped.
    Linked,
    Created,
    Deleted,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleSyncReport {
    pub local_module_id: String,
    pub remote_module_id: u64,
    pub module: SyncAction,
    pub free_plan: SyncAction,
    pub paid_plan: SyncAction,
    /// Local pricing ids that got a new remote tier.
    pub pricing_created: Vec<String>,
    /// Local pricing ids matched to an existing remote tier.
    pub pricing_linked: Vec<String>,
}

/// Mirrors a storefront product, its plans and its pricing tiers onto the
/// licensing platform.
#[derive(Clone)]
pub struct CatalogSync {
    mapper: EntityMapper,
    remote: LicensingRemote,
}

impl CatalogSync {
    pub fn new(mapper: EntityMapper, remote: LicensingRemote) -> Self {
        Self { mapper, remote }
    }

    /// Brings the remote catalog for `module` up to date.
    ///
    /// Safe to re-run: mapped entities are reused and remote pricing is only
    /// ever added to. `flush` re-resolves the module by slug even when a
    /// mapping exists.
    pub async fn sync_module(
        &self,
        module: &LocalModule,
        flush: bool,
    ) -> Result<ModuleSyncReport, SyncError> {
        let (remote_module_id, module_action) = self.sync_module_entity(module, flush).await?;
        let mut report = ModuleSyncReport {
            local_module_id: module.local_id().to_string(),
            remote_module_id,
            module: module_action,
            free_plan: SyncAction::Skipped,
            paid_plan: SyncAction::Skipped,
            pricing_created: Vec::new(),
            pricing_linked: Vec::new(),
        };

        let mut plans = None;
        report.free_plan = self
            .sync_free_plan(module, remote_module_id, &mut plans)
            .await?;
        let paid_plan = self
            .sync_paid_plan(module, remote_module_id, &mut plans, &mut report)
            .await?;
        report.paid_plan = paid_plan;

        info!(
            local_module_id = %report.local_module_id,
            remote_module_id,
            module = ?report.module,
            free_plan = ?report.free_plan,
            paid_plan = ?report.paid_plan,
            pricing_created = report.pricing_created.len(),
            pricing_linked = report.pricing_linked.len(),
            "module synced"
        );
        Ok(report)
    }

    async fn sync_module_entity(
        &self,
        module: &LocalModule,
        flush: bool,
    ) -> Result<(u64, SyncAction), SyncError> {
        if !flush
            && let Some(remote_id) = self
                .mapper
                .get_remote_id(EntityType::Module, module.local_id())
                .await?
        {
            return Ok((remote_id, SyncAction::Reused));
        }

        let (remote_id, action) = match self.remote.find_module_by_slug(&module.slug).await? {
            Some(existing) => (existing.id, SyncAction::Linked),
            None => {
                let created = self.remote.create_module(&module.module_for_api()).await?;
                (created.id, SyncAction::Created)
            }
        };
        // A flush replaces the stored link; otherwise the first writer wins.
        let remote_id = if flush {
            self.mapper
                .link(EntityType::Module, module.local_id(), remote_id)
                .await?
                .remote_id
        } else {
            link_created(&self.mapper, EntityType::Module, module.local_id(), remote_id).await?
        };
        Ok((remote_id, action))
    }

    async fn sync_free_plan(
        &self,
        module: &LocalModule,
        remote_module_id: u64,
        plans: &mut Option<Vec<RemotePlan>>,
    ) -> Result<SyncAction, SyncError> {
        let (Some(local_plan_id), Some(payload)) =
            (module.free_plan_id(), module.free_plan_for_api())
        else {
            return self.remove_remote_free_plan(remote_module_id, plans).await;
        };

        if self
            .mapper
            .get_remote_id(EntityType::Plan, local_plan_id)
            .await?
            .is_some()
        {
            return Ok(SyncAction::Reused);
        }

        let existing = self
            .remote_plans(remote_module_id, plans)
            .await?
            .iter()
            .find(|plan| plan.is_free())
            .map(|plan| plan.id);
        if let Some(plan_id) = existing {
            link_created(&self.mapper, EntityType::Plan, local_plan_id, plan_id).await?;
            return Ok(SyncAction::Linked);
        }

        let created = self.remote.create_plan(remote_module_id, &payload).await?;
        link_created(&self.mapper, EntityType::Plan, local_plan_id, created.id).await?;
        if let Some(plans) = plans.as_mut() {
            plans.push(created);
        }
        Ok(SyncAction::Created)
    }

    /// The platform gives every new module a free plan; a product without one
    /// must not keep it.
    async fn remove_remote_free_plan(
        &self,
        remote_module_id: u64,
        plans: &mut Option<Vec<RemotePlan>>,
    ) -> Result<SyncAction, SyncError> {
        let free_plan_ids = self
            .remote_plans(remote_module_id, plans)
            .await?
            .iter()
            .filter(|plan| plan.is_free())
            .map(|plan| plan.id)
            .collect::<Vec<_>>();
        if free_plan_ids.is_empty() {
            return Ok(SyncAction::Skipped);
        }

        for plan_id in &free_plan_ids {
            self.remote.delete_plan(remote_module_id, *plan_id).await?;
        }
        if let Some(plans) = plans.as_mut() {
            plans.retain(|plan| !plan.is_free());
        }
        info!(
            remote_module_id,
            deleted = free_plan_ids.len(),
            "removed remote free plan"
        );
        Ok(SyncAction::Deleted)
    }

    async fn sync_paid_plan(
        &self,
        module: &LocalModule,
        remote_module_id: u64,
        plans: &mut Option<Vec<RemotePlan>>,
        report: &mut ModuleSyncReport,
    ) -> Result<SyncAction, SyncError> {
        let (Some(local_plan_id), Some(payload)) =
            (module.paid_plan_id(), module.paid_plan_for_api())
        else {
            return Ok(SyncAction::Skipped);
        };

        let (plan_id, action) = if let Some(plan_id) = self
            .mapper
            .get_remote_id(EntityType::Plan, local_plan_id)
            .await?
        {
            (plan_id, SyncAction::Reused)
        } else {
            let existing = self
                .remote_plans(remote_module_id, plans)
                .await?
                .iter()
                .find(|plan| !plan.is_free() && plan.name == payload.name)
                .map(|plan| plan.id);
            if let Some(plan_id) = existing {
                let plan_id =
                    link_created(&self.mapper, EntityType::Plan, local_plan_id, plan_id).await?;
                (plan_id, SyncAction::Linked)
            } else {
                let created = self.remote.create_plan(remote_module_id, &payload).await?;
                let plan_id =
                    link_created(&self.mapper, EntityType::Plan, local_plan_id, created.id)
                        .await?;
                (plan_id, SyncAction::Created)
            }
        };

        let remote_pricing = if action == SyncAction::Created {
            Vec::new()
        } else {
            self.remote.list_pricing(remote_module_id, plan_id).await?
        };
        self.sync_pricing(module, remote_module_id, plan_id, &remote_pricing, report)
            .await?;
        Ok(action)
    }

    /// Adds local tiers missing remotely. Tiers are matched on their site
    /// quota; remote tiers are never changed or removed.
    async fn sync_pricing(
        &self,
        module: &LocalModule,
        remote_module_id: u64,
        plan_id: u64,
        remote_pricing: &[RemotePricing],
        report: &mut ModuleSyncReport,
    ) -> Result<(), SyncError> {
        let mut claimed = HashSet::new();
        let mut unmatched: Vec<&LocalPricing> = Vec::new();
        for pricing in module.paid_plan_pricing() {
            match self
                .mapper
                .get_remote_id(EntityType::Pricing, &pricing.id)
                .await?
            {
                Some(remote_id) => {
                    claimed.insert(remote_id);
                }
                None => unmatched.push(pricing),
            }
        }

        for pricing in unmatched {
            let existing = remote_pricing
                .iter()
                .find(|tier| tier.licenses == pricing.licenses && !claimed.contains(&tier.id));
            if let Some(tier) = existing {
                let remote_id =
                    link_created(&self.mapper, EntityType::Pricing, &pricing.id, tier.id).await?;
                claimed.insert(remote_id);
                report.pricing_linked.push(pricing.id.clone());
                continue;
            }

            let created = self
                .remote
                .create_pricing(remote_module_id, plan_id, &pricing.pricing_for_api())
                .await?;
            let remote_id =
                link_created(&self.mapper, EntityType::Pricing, &pricing.id, created.id).await?;
            claimed.insert(remote_id);
            report.pricing_created.push(pricing.id.clone());
        }
        Ok(())
    }

    async fn remote_plans<'a>(
        &self,
        remote_module_id: u64,
        plans: &'a mut Option<Vec<RemotePlan>>,
    ) -> Result<&'a [RemotePlan], SyncError> {
        if plans.is_none() {
            *plans = Some(self.remote.list_plans(remote_module_id).await?);
        }
        Ok(plans.as_deref().unwrap_or_default())
    }
}
