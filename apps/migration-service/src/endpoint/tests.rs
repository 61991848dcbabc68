use chrono::Utc;
use licensing_api_client::{ApiError, HttpMethod};
use serde_json::{Value, json};

use crate::endpoint::{BundleKind, MigrationError, MigrationRequest, MigrationResponse};
use crate::fixtures::{Harness, NAMESPACE, payment};
use crate::licensing::{MigratedCustomer, RenewalOutcome};
use crate::mapping::{EntityType, store};

fn environment() -> Value {
    json!({
        "plugin_version": "3.1.0",
        "is_premium": true,
        "platform_version": "6.4.2",
        "php_version": "8.2"
    })
}

fn single(key: &str) -> MigrationRequest {
    let mut body = environment();
    body["site_uid"] = json!("abc");
    body["site_url"] = json!("https://one.test");
    body["site_name"] = json!("One");
    body["language"] = json!("en-US");
    body["charset"] = json!("UTF-8");
    body["license_key"] = json!(key);
    serde_json::from_value(body).expect("request")
}

fn bundle(children: &[&str]) -> MigrationRequest {
    let mut body = environment();
    body["site_uid"] = json!("abc");
    body["site_url"] = json!("https://one.test");
    body["site_name"] = json!("One");
    body["language"] = json!("en-US");
    body["charset"] = json!("UTF-8");
    body["children_license_keys"] = json!(children);
    serde_json::from_value(body).expect("request")
}

fn network(sites: Value) -> MigrationRequest {
    let mut body = environment();
    body["sites"] = sites;
    serde_json::from_value(body).expect("request")
}

#[tokio::test]
async fn single_site_migrates_license_and_install() -> anyhow::Result<()> {
    let harness = Harness::new().with_synced_catalog().await?;
    let module_id = harness.remote_module_id("12").await?;

    let response = harness
        .endpoint()
        .migrate(module_id, single("PURCHASE-1"))
        .await?;

    let MigrationResponse::Site { user, install } = response else {
        anyhow::bail!("expected single-site response");
    };
    assert!(matches!(user, MigratedCustomer::Created(ref user) if user.email == "ada@example.com"));
    assert_eq!(install.uid, "abc");
    assert_eq!(
        install.license_id,
        harness.mapper.get_remote_id(EntityType::License, "l1").await?
    );
    assert!(
        harness
            .mapper
            .get(EntityType::MigrationClaim, "l1:abc")
            .await?
            .is_none()
    );
    Ok(())
}

#[tokio::test]
async fn repeated_request_reuses_everything() -> anyhow::Result<()> {
    let harness = Harness::new().with_synced_catalog().await?;
    let module_id = harness.remote_module_id("12").await?;
    let endpoint = harness.endpoint();

    let first = endpoint.migrate(module_id, single("PURCHASE-1")).await?;
    harness.fake.clear_calls();
    let second = endpoint.migrate(module_id, single("PURCHASE-1")).await?;

    let (
        MigrationResponse::Site { install: a, .. },
        MigrationResponse::Site { install: b, user },
    ) = (first, second)
    else {
        anyhow::bail!("expected single-site responses");
    };
    assert_eq!(a.id, b.id);
    assert!(matches!(user, MigratedCustomer::Existing { .. }));
    let writes = harness
        .fake
        .calls()
        .into_iter()
        .filter(|call| call.method != HttpMethod::Get)
        .count();
    assert_eq!(writes, 0);
    Ok(())
}

#[tokio::test]
async fn rejected_requests_never_reach_the_platform() -> anyhow::Result<()> {
    let harness = Harness::new().with_synced_catalog().await?;
    let module_id = harness.remote_module_id("12").await?;
    let endpoint = harness.endpoint();

    let cases = [
        (module_id + 999, single("PURCHASE-1"), "invalid_module_id"),
        (module_id, single("NOPE"), "invalid_license_key"),
        (module_id, single("EXPIRED-1"), "license_expired"),
        (module_id, single("DISABLED-1"), "license_disabled"),
        (module_id, single("  "), "empty_license_key"),
    ];
    for (target, request, code) in cases {
        let error = endpoint
            .migrate(target, request)
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("expected {code}"))?;
        assert_eq!(error.code(), code);
    }
    assert!(harness.fake.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn network_groups_sites_by_license_and_keeps_order() -> anyhow::Result<()> {
    let harness = Harness::new().with_synced_catalog().await?;
    let module_id = harness.remote_module_id("12").await?;

    let response = harness
        .endpoint()
        .migrate(
            module_id,
            network(json!([
                { "uid": "a", "url": "https://a.test", "license_key": "PURCHASE-1" },
                { "uid": "b", "url": "https://b.test" },
                { "uid": "c", "url": "https://c.test", "license_key": "PURCHASE-1" },
                { "uid": "d", "url": "https://d.test", "license_key": "SUB-1" }
            ])),
        )
        .await?;

    let MigrationResponse::Network {
        user,
        installs,
        skipped_sites,
    } = response
    else {
        anyhow::bail!("expected network response");
    };
    let uids = installs
        .iter()
        .map(|install| install.uid.as_str())
        .collect::<Vec<_>>();
    assert_eq!(uids, vec!["a", "c", "d"]);
    assert_eq!(skipped_sites, vec!["b"]);
    assert_eq!(
        Some(user.id()),
        harness.mapper.get_remote_id(EntityType::User, "c1").await?
    );
    assert_eq!(harness.fake.count(HttpMethod::Post, "/installs.json"), 2);
    Ok(())
}

#[tokio::test]
async fn network_site_with_add_on_keys_installs_under_the_bundle_license() -> anyhow::Result<()> {
    let harness = Harness::new().with_synced_catalog().await?;
    let module_id = harness.remote_module_id("12").await?;

    let response = harness
        .endpoint()
        .migrate(
            module_id,
            network(json!([
                { "uid": "a", "url": "https://a.test", "children_license_keys": ["ADDON-1"] },
                { "uid": "b", "url": "https://b.test", "license_key": "PURCHASE-1" }
            ])),
        )
        .await?;

    let MigrationResponse::Network {
        installs,
        skipped_sites,
        ..
    } = response
    else {
        anyhow::bail!("expected network response");
    };
    let uids = installs
        .iter()
        .map(|install| install.uid.as_str())
        .collect::<Vec<_>>();
    assert_eq!(uids, vec!["a", "b"]);
    assert!(skipped_sites.is_empty());

    let bundle_license = harness.mapper.get_remote_id(EntityType::License, "l5").await?;
    assert!(bundle_license.is_some());
    assert!(harness.mapper.get(EntityType::License, "l6").await?.is_none());
    assert_eq!(installs[0].license_id, bundle_license);
    assert_eq!(
        installs[1].license_id,
        harness.mapper.get_remote_id(EntityType::License, "l1").await?
    );
    assert_eq!(harness.fake.count(HttpMethod::Post, "/installs.json"), 2);
    Ok(())
}

#[tokio::test]
async fn network_validation_fails_before_any_remote_call() -> anyhow::Result<()> {
    let harness = Harness::new().with_synced_catalog().await?;
    let module_id = harness.remote_module_id("12").await?;

    let error = harness
        .endpoint()
        .migrate(
            module_id,
            network(json!([
                { "uid": "a", "url": "https://a.test", "license_key": "PURCHASE-1" },
                { "uid": "b", "license_key": "SUB-1" }
            ])),
        )
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected validation error"))?;

    assert!(matches!(
        error,
        MigrationError::MissingSiteParam {
            site_index: 1,
            param: "url"
        }
    ));
    assert!(harness.fake.calls().is_empty());
    Ok(())
}

#[tokio::test]
async fn bundle_license_takes_precedence_over_add_on() -> anyhow::Result<()> {
    let harness = Harness::new().with_synced_catalog().await?;
    let module_id = harness.remote_module_id("12").await?;
    let bundle_module_id = harness.remote_module_id("40").await?;

    let response = harness
        .endpoint()
        .migrate(module_id, bundle(&["ADDON-1"]))
        .await?;

    assert!(matches!(
        response,
        MigrationResponse::Bundle { kind: BundleKind::Bundle, ref license_key, .. }
            if license_key == "BUNDLE-1"
    ));
    assert!(harness.mapper.get(EntityType::License, "l5").await?.is_some());
    assert!(harness.mapper.get(EntityType::License, "l6").await?.is_none());
    assert_eq!(
        harness
            .fake
            .count(HttpMethod::Post, &format!("/plugins/{bundle_module_id}/plans/")),
        1
    );
    Ok(())
}

#[tokio::test]
async fn add_on_is_used_when_bundle_migration_fails() -> anyhow::Result<()> {
    let harness = Harness::new().with_synced_catalog().await?;
    let module_id = harness.remote_module_id("12").await?;
    let bundle_module_id = harness.remote_module_id("40").await?;
    harness.fake.fail_on(
        HttpMethod::Post,
        &format!("/plugins/{bundle_module_id}/plans/"),
        ApiError::new("pricing_unavailable", "bundle pricing is archived", 422),
    );

    let response = harness
        .endpoint()
        .migrate(module_id, bundle(&["NOPE", "ADDON-1"]))
        .await?;

    let MigrationResponse::Bundle {
        kind, license_key, ..
    } = response
    else {
        anyhow::bail!("expected bundle response");
    };
    assert_eq!(kind, BundleKind::AddOn);
    assert_eq!(license_key, "ADDON-1");
    Ok(())
}

#[tokio::test]
async fn add_on_without_parent_is_returned_as_add_on() -> anyhow::Result<()> {
    let harness = Harness::new().with_synced_catalog().await?;
    let module_id = harness.remote_module_id("12").await?;

    let response = harness
        .endpoint()
        .migrate(module_id, bundle(&["ADDON-2"]))
        .await?;

    assert!(matches!(
        response,
        MigrationResponse::Bundle { kind: BundleKind::AddOn, ref license_key, .. }
            if license_key == "ADDON-2"
    ));
    Ok(())
}

#[tokio::test]
async fn concurrent_duplicate_is_rejected_but_stale_claim_is_taken_over() -> anyhow::Result<()> {
    let mapping_store = store::memory();
    let harness = Harness::with_store(mapping_store.clone())
        .with_synced_catalog()
        .await?;
    let module_id = harness.remote_module_id("12").await?;
    let endpoint = harness.endpoint();

    harness
        .mapper
        .link_if_absent(EntityType::MigrationClaim, "l1:abc", 0)
        .await?;
    let error = endpoint
        .migrate(module_id, single("PURCHASE-1"))
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected claim conflict"))?;
    assert_eq!(error.code(), "migration_in_progress");
    assert_eq!(error.status().as_u16(), 409);
    assert!(harness.fake.calls().is_empty());

    mapping_store
        .upsert(
            NAMESPACE,
            EntityType::MigrationClaim,
            "l1:abc",
            0,
            Utc::now() - chrono::Duration::hours(1),
        )
        .await?;
    endpoint.migrate(module_id, single("PURCHASE-1")).await?;
    assert!(
        harness
            .mapper
            .get(EntityType::MigrationClaim, "l1:abc")
            .await?
            .is_none()
    );
    Ok(())
}

#[tokio::test]
async fn stale_holder_cannot_release_a_taken_over_claim() -> anyhow::Result<()> {
    let mapping_store = store::memory();
    let harness = Harness::with_store(mapping_store.clone());
    let endpoint = harness.endpoint();

    let stale_token = endpoint.claim("l1:abc").await?;
    mapping_store
        .upsert(
            NAMESPACE,
            EntityType::MigrationClaim,
            "l1:abc",
            stale_token,
            Utc::now() - chrono::Duration::hours(1),
        )
        .await?;
    let token = endpoint.claim("l1:abc").await?;
    assert_ne!(token, stale_token);

    endpoint.release("l1:abc", stale_token).await;
    assert_eq!(
        harness
            .mapper
            .get_remote_id(EntityType::MigrationClaim, "l1:abc")
            .await?,
        Some(token)
    );
    let error = endpoint
        .claim("l1:abc")
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected claim conflict"))?;
    assert_eq!(error.code(), "migration_in_progress");

    endpoint.release("l1:abc", token).await;
    assert!(
        harness
            .mapper
            .get(EntityType::MigrationClaim, "l1:abc")
            .await?
            .is_none()
    );
    Ok(())
}

#[tokio::test]
async fn renewal_for_unknown_subscription_is_not_found() -> anyhow::Result<()> {
    let harness = Harness::new().with_synced_catalog().await?;
    let module_id = harness.remote_module_id("12").await?;
    let endpoint = harness.endpoint();

    let error = endpoint
        .migrate_renewal(module_id, "s404", &payment("pay-20", 49.0, 20))
        .await
        .err()
        .ok_or_else(|| anyhow::anyhow!("expected not_found"))?;
    assert_eq!(error.code(), "not_found");

    let outcome = endpoint
        .migrate_renewal(module_id, "s1", &payment("pay-20", 49.0, 20))
        .await?;
    assert_eq!(outcome, RenewalOutcome::SubscriptionNotMigrated);
    Ok(())
}
