use licensing_api_client::codes;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::{SyncError, link_created, require_remote_id};
use crate::mapping::{EntityMapper, EntityType};
use crate::remote::{LicensingRemote, RemoteInstall, RemoteUser};
use crate::source::{
    LocalInstall, LocalLicenseGraph, LocalLicenseOrigin, LocalModule, LocalPayment,
    LocalSubscription,
};

/// The remote user a license ended up under.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MigratedCustomer {
    /// Created by this migration.
    Created(RemoteUser),
    /// Mapped earlier, or already registered on the platform.
    Existing { id: u64 },
}

impl MigratedCustomer {
    pub fn id(&self) -> u64 {
        match self {
            Self::Created(user) => user.id,
            Self::Existing { id } => *id,
        }
    }
}

/// One license being migrated under one remote module.
#[derive(Debug, Clone, Copy)]
pub struct LicenseContext<'a> {
    pub remote_module_id: u64,
    /// The storefront product the license was sold for.
    pub module: &'a LocalModule,
    pub graph: &'a LocalLicenseGraph,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstallMigration {
    pub user: MigratedCustomer,
    /// Same order as the installs passed in.
    pub installs: Vec<RemoteInstall>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RenewalOutcome {
    Migrated { remote_payment_id: u64 },
    AlreadyMigrated { remote_payment_id: u64 },
    SkippedSandbox,
    SkippedNonPositive,
    /// The subscription itself has not been migrated yet; the renewal will
    /// arrive with it when its license is migrated.
    SubscriptionNotMigrated,
}

/// Moves customers, licenses, payments, subscriptions and installs onto the
/// licensing platform.
///
/// Every step checks the mapping first and links right after a remote
/// create, so an interrupted migration resumes where it stopped.
#[derive(Clone)]
pub struct LicenseMigration {
    mapper: EntityMapper,
    remote: LicensingRemote,
}

impl LicenseMigration {
    pub fn new(mapper: EntityMapper, remote: LicensingRemote) -> Self {
        Self { mapper, remote }
    }

    pub async fn migrate_license(
        &self,
        ctx: &LicenseContext<'_>,
    ) -> Result<MigratedCustomer, SyncError> {
        let license = &ctx.graph.license;
        let customer = self.sync_customer(ctx).await?;

        if let Err(error) = self.sync_billing(ctx, customer.id()).await {
            warn!(
                license_id = %license.id,
                user_id = customer.id(),
                reason = %error,
                "billing migration failed; continuing without it"
            );
        }

        let created_license_id = match &license.origin {
            LocalLicenseOrigin::Purchase { payment } => {
                self.sync_purchase(ctx, customer.id(), payment).await?
            }
            LocalLicenseOrigin::Subscription {
                subscription,
                initial_payment,
                renewals,
            } => {
                self.sync_subscription(ctx, customer.id(), subscription, initial_payment, renewals)
                    .await?
            }
        };

        let remote_license_id = self.sync_license_link(ctx, created_license_id).await?;
        info!(
            license_id = %license.id,
            remote_license_id,
            user_id = customer.id(),
            subscription = ctx.graph.is_subscription(),
            "license migrated"
        );
        Ok(customer)
    }

    async fn sync_customer(&self, ctx: &LicenseContext<'_>) -> Result<MigratedCustomer, SyncError> {
        let customer = &ctx.graph.customer;
        if let Some(id) = self
            .mapper
            .get_remote_id(EntityType::User, &customer.id)
            .await?
        {
            return Ok(MigratedCustomer::Existing { id });
        }

        match self
            .remote
            .create_user(ctx.remote_module_id, &customer.customer_for_api())
            .await
        {
            Ok(user) => {
                let id = link_created(&self.mapper, EntityType::User, &customer.id, user.id).await?;
                if id == user.id {
                    Ok(MigratedCustomer::Created(user))
                } else {
                    Ok(MigratedCustomer::Existing { id })
                }
            }
            Err(error) if error.is(codes::USER_EXIST) => {
                // Registered outside this migration; used as-is and not linked.
                let existing = self
                    .remote
                    .find_user_by_email(ctx.remote_module_id, customer.email.trim())
                    .await?;
                match existing {
                    Some(user) => {
                        debug!(customer_id = %customer.id, user_id = user.id, "reusing existing remote user");
                        Ok(MigratedCustomer::Existing { id: user.id })
                    }
                    None => Err(error.into()),
                }
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn sync_billing(&self, ctx: &LicenseContext<'_>, user_id: u64) -> Result<(), SyncError> {
        let customer = &ctx.graph.customer;
        let (Some(billing), Some(payload)) = (customer.billing.as_ref(), customer.billing_for_api())
        else {
            return Ok(());
        };
        if self
            .mapper
            .get_remote_id(EntityType::Billing, &billing.id)
            .await?
            .is_some()
        {
            return Ok(());
        }
        if self
            .remote
            .get_billing(ctx.remote_module_id, user_id)
            .await?
            .is_some()
        {
            return Ok(());
        }

        let created = self
            .remote
            .put_billing(ctx.remote_module_id, user_id, &payload)
            .await?;
        link_created(&self.mapper, EntityType::Billing, &billing.id, created.id).await?;
        Ok(())
    }

    /// Returns the license id the purchase created, when it was created now.
    async fn sync_purchase(
        &self,
        ctx: &LicenseContext<'_>,
        user_id: u64,
        payment: &LocalPayment,
    ) -> Result<Option<u64>, SyncError> {
        if self
            .mapper
            .get_remote_id(EntityType::Payment, &payment.id)
            .await?
            .is_some()
        {
            return Ok(None);
        }

        let (plan_id, pricing_id) = self.remote_plan_and_pricing(ctx).await?;
        let created = self
            .remote
            .create_purchase(
                ctx.remote_module_id,
                plan_id,
                pricing_id,
                &ctx.graph.purchase_for_api(user_id, payment),
            )
            .await?;
        link_created(&self.mapper, EntityType::Payment, &payment.id, created.id).await?;
        Ok(created.license_id)
    }

    /// Creates the subscription if needed, then its payments oldest first.
    /// The first payment that fails stops the run; earlier ones stay linked.
    async fn sync_subscription(
        &self,
        ctx: &LicenseContext<'_>,
        user_id: u64,
        subscription: &LocalSubscription,
        initial_payment: &LocalPayment,
        renewals: &[LocalPayment],
    ) -> Result<Option<u64>, SyncError> {
        let (remote_subscription_id, created_license_id) = match self
            .mapper
            .get_remote_id(EntityType::Subscription, &subscription.id)
            .await?
        {
            Some(remote_id) => (remote_id, None),
            None => {
                let (plan_id, pricing_id) = self.remote_plan_and_pricing(ctx).await?;
                let created = self
                    .remote
                    .create_subscription(
                        ctx.remote_module_id,
                        plan_id,
                        pricing_id,
                        &ctx.graph.subscription_for_api(user_id, subscription),
                    )
                    .await?;
                let remote_id = link_created(
                    &self.mapper,
                    EntityType::Subscription,
                    &subscription.id,
                    created.id,
                )
                .await?;
                (remote_id, created.license_id)
            }
        };

        for payment in std::iter::once(initial_payment).chain(renewals) {
            self.sync_subscription_payment(ctx.remote_module_id, remote_subscription_id, payment)
                .await?;
        }
        Ok(created_license_id)
    }

    async fn sync_subscription_payment(
        &self,
        remote_module_id: u64,
        remote_subscription_id: u64,
        payment: &LocalPayment,
    ) -> Result<u64, SyncError> {
        if let Some(remote_id) = self
            .mapper
            .get_remote_id(EntityType::Payment, &payment.id)
            .await?
        {
            return Ok(remote_id);
        }
        let created = self
            .remote
            .create_subscription_payment(
                remote_module_id,
                remote_subscription_id,
                &payment.payment_for_api(),
            )
            .await?;
        link_created(&self.mapper, EntityType::Payment, &payment.id, created.id).await
    }

    async fn sync_license_link(
        &self,
        ctx: &LicenseContext<'_>,
        created_license_id: Option<u64>,
    ) -> Result<u64, SyncError> {
        let license = &ctx.graph.license;
        if let Some(remote_id) = self
            .mapper
            .get_remote_id(EntityType::License, &license.id)
            .await?
        {
            return Ok(remote_id);
        }

        let remote_license_id = match created_license_id {
            Some(remote_id) => remote_id,
            None => self.fetch_remote_license_id(ctx).await?,
        };
        link_created(
            &self.mapper,
            EntityType::License,
            &license.id,
            remote_license_id,
        )
        .await
    }

    /// Reads the license id back from the payment or subscription that
    /// created it, for runs that stopped before the license was linked.
    async fn fetch_remote_license_id(&self, ctx: &LicenseContext<'_>) -> Result<u64, SyncError> {
        let license_id = match &ctx.graph.license.origin {
            LocalLicenseOrigin::Purchase { payment } => {
                let payment_id =
                    require_remote_id(&self.mapper, EntityType::Payment, &payment.id).await?;
                self.remote
                    .get_payment(ctx.remote_module_id, payment_id)
                    .await?
                    .license_id
            }
            LocalLicenseOrigin::Subscription { subscription, .. } => {
                let subscription_id =
                    require_remote_id(&self.mapper, EntityType::Subscription, &subscription.id)
                        .await?;
                self.remote
                    .get_subscription(ctx.remote_module_id, subscription_id)
                    .await?
                    .license_id
            }
        };
        license_id.ok_or(SyncError::MissingRemoteField("license_id"))
    }

    async fn remote_plan_and_pricing(
        &self,
        ctx: &LicenseContext<'_>,
    ) -> Result<(u64, u64), SyncError> {
        let local_plan_id = ctx
            .module
            .paid_plan_id()
            .ok_or_else(|| SyncError::not_migrated(EntityType::Plan, ctx.module.local_id()))?;
        let plan_id = require_remote_id(&self.mapper, EntityType::Plan, local_plan_id).await?;
        let pricing_id =
            require_remote_id(&self.mapper, EntityType::Pricing, &ctx.graph.license.pricing_id)
                .await?;
        Ok((plan_id, pricing_id))
    }

    /// Activates `installs` under the already migrated license.
    ///
    /// Mapped installs are reused and moved to this license if needed; the
    /// rest are created in a single batch call.
    pub async fn migrate_installs(
        &self,
        ctx: &LicenseContext<'_>,
        installs: &[LocalInstall],
        customer: MigratedCustomer,
    ) -> Result<InstallMigration, SyncError> {
        let license_id =
            require_remote_id(&self.mapper, EntityType::License, &ctx.graph.license.id).await?;

        let mut resolved: Vec<Option<RemoteInstall>> = vec![None; installs.len()];
        // Sites that canonicalize to the same install share one remote install.
        let mut pending: Vec<(String, Vec<usize>)> = Vec::new();
        for (index, install) in installs.iter().enumerate() {
            let local_install_id = install.local_install_id();
            if let Some((_, slots)) = pending.iter_mut().find(|(id, _)| *id == local_install_id) {
                slots.push(index);
                continue;
            }
            match self
                .reuse_install(ctx.remote_module_id, &local_install_id, license_id)
                .await?
            {
                Some(remote) => resolved[index] = Some(remote),
                None => pending.push((local_install_id, vec![index])),
            }
        }

        if !pending.is_empty() {
            let payloads = pending
                .iter()
                .map(|(_, slots)| installs[slots[0]].install_for_api())
                .collect::<Vec<_>>();
            let created = self
                .remote
                .create_installs(ctx.remote_module_id, customer.id(), license_id, &payloads)
                .await?;
            for ((local_install_id, slots), mut install) in pending.into_iter().zip(created) {
                install.id =
                    link_created(&self.mapper, EntityType::Install, &local_install_id, install.id)
                        .await?;
                for index in slots {
                    resolved[index] = Some(install.clone());
                }
            }
        }

        let installs = resolved
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or(SyncError::MissingRemoteField("installs"))?;
        Ok(InstallMigration {
            user: customer,
            installs,
        })
    }

    async fn reuse_install(
        &self,
        remote_module_id: u64,
        local_install_id: &str,
        license_id: u64,
    ) -> Result<Option<RemoteInstall>, SyncError> {
        let Some(install_id) = self
            .mapper
            .get_remote_id(EntityType::Install, local_install_id)
            .await?
        else {
            return Ok(None);
        };

        let install = match self.remote.get_install(remote_module_id, install_id).await {
            Ok(install) => install,
            Err(error) if error.is(codes::INSTALL_NOT_FOUND) => {
                info!(
                    local_install_id,
                    remote_install_id = install_id,
                    "mapped install no longer exists remotely; recreating"
                );
                self.mapper
                    .unlink(EntityType::Install, local_install_id)
                    .await?;
                return Ok(None);
            }
            Err(error) => return Err(error.into()),
        };
        if install.license_id == Some(license_id) {
            return Ok(Some(install));
        }

        let previous_license_id = install.license_id;
        if let Some(previous) = previous_license_id {
            self.remote
                .deactivate_license(remote_module_id, install_id, previous)
                .await?;
        }
        let install = self
            .remote
            .activate_license(remote_module_id, install_id, license_id)
            .await?;
        info!(
            remote_install_id = install_id,
            previous_license_id = ?previous_license_id,
            license_id,
            "install moved to migrated license"
        );
        Ok(Some(install))
    }

    /// Mirrors one renewal charge onto an already migrated subscription.
    pub async fn migrate_subscription_renewal(
        &self,
        remote_module_id: u64,
        local_subscription_id: &str,
        payment: &LocalPayment,
    ) -> Result<RenewalOutcome, SyncError> {
        if payment.is_sandbox {
            debug!(payment_id = %payment.id, "ignoring sandbox renewal");
            return Ok(RenewalOutcome::SkippedSandbox);
        }
        if payment.gross <= 0.0 {
            debug!(payment_id = %payment.id, gross = payment.gross, "ignoring non-positive renewal");
            return Ok(RenewalOutcome::SkippedNonPositive);
        }

        let Some(remote_subscription_id) = self
            .mapper
            .get_remote_id(EntityType::Subscription, local_subscription_id)
            .await?
        else {
            info!(
                local_subscription_id,
                payment_id = %payment.id,
                "renewal for unmigrated subscription dropped"
            );
            return Ok(RenewalOutcome::SubscriptionNotMigrated);
        };

        if let Some(remote_payment_id) = self
            .mapper
            .get_remote_id(EntityType::Payment, &payment.id)
            .await?
        {
            return Ok(RenewalOutcome::AlreadyMigrated { remote_payment_id });
        }

        let remote_payment_id = self
            .sync_subscription_payment(remote_module_id, remote_subscription_id, payment)
            .await?;
        info!(
            local_subscription_id,
            remote_subscription_id,
            remote_payment_id,
            "subscription renewal migrated"
        );
        Ok(RenewalOutcome::Migrated { remote_payment_id })
    }
}
