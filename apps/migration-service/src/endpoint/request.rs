use serde::Deserialize;

use super::error::MigrationError;
use crate::source::SiteDescriptor;

/// Body of `POST /v1/modules/{module_id}/migrate` as sent by the client
/// plugin. Everything is optional here; [`MigrationRequest::validate`]
/// decides what is required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MigrationRequest {
    #[serde(default)]
    pub plugin_version: Option<String>,
    #[serde(default)]
    pub is_premium: Option<bool>,
    #[serde(default)]
    pub platform_version: Option<String>,
    #[serde(default)]
    pub programming_language_version: Option<String>,
    /// Older clients send this instead of `programming_language_version`.
    #[serde(default)]
    pub php_version: Option<String>,
    #[serde(default)]
    pub site_uid: Option<String>,
    #[serde(default)]
    pub site_url: Option<String>,
    #[serde(default)]
    pub site_name: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub charset: Option<String>,
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default)]
    pub children_license_keys: Option<Vec<String>>,
    #[serde(default)]
    pub sites: Option<Vec<NetworkSiteRequest>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NetworkSiteRequest {
    #[serde(default)]
    pub uid: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub charset: Option<String>,
    #[serde(default)]
    pub license_key: Option<String>,
    #[serde(default)]
    pub children_license_keys: Option<Vec<String>>,
}

/// Which license a site should be migrated under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LicenseSelector {
    Key(String),
    /// Add-on keys of a bundle purchase, in request order.
    Bundle(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSite {
    pub site: SiteDescriptor,
    pub selector: Option<LicenseSelector>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationTarget {
    Site {
        site: SiteDescriptor,
        selector: LicenseSelector,
    },
    Network {
        sites: Vec<NetworkSite>,
    },
}

struct ClientEnvironment {
    module_version: String,
    is_premium: bool,
    platform_version: String,
    programming_language_version: String,
}

impl ClientEnvironment {
    fn site(
        &self,
        uid: String,
        url: String,
        title: String,
        language: Option<String>,
        charset: Option<String>,
    ) -> SiteDescriptor {
        SiteDescriptor {
            uid,
            url,
            title,
            language,
            charset,
            platform_version: self.platform_version.clone(),
            programming_language_version: self.programming_language_version.clone(),
            module_version: self.module_version.clone(),
            is_premium: self.is_premium,
        }
    }
}

impl MigrationRequest {
    /// Checks the request completely before anything is looked up or sent
    /// remotely. Common fields come first, then the fields of the detected
    /// mode, then license key presence.
    pub fn validate(self) -> Result<MigrationTarget, MigrationError> {
        let environment = ClientEnvironment {
            module_version: required(self.plugin_version, "plugin_version")?,
            is_premium: self
                .is_premium
                .ok_or(MigrationError::MissingParam { param: "is_premium" })?,
            platform_version: required(self.platform_version, "platform_version")?,
            programming_language_version: required(
                non_empty(self.programming_language_version).or(self.php_version),
                "programming_language_version",
            )?,
        };

        if let Some(sites) = self.sites {
            return validate_network(&environment, sites);
        }

        let site = environment.site(
            required(self.site_uid, "site_uid")?,
            required(self.site_url, "site_url")?,
            required(self.site_name, "site_name")?,
            Some(required(self.language, "language")?),
            Some(required(self.charset, "charset")?),
        );
        if let Some(children) = bundle_keys(self.children_license_keys) {
            return Ok(MigrationTarget::Site {
                site,
                selector: LicenseSelector::Bundle(children),
            });
        }
        let key = self
            .license_key
            .ok_or(MigrationError::MissingParam {
                param: "license_key",
            })?
            .trim()
            .to_string();
        if key.is_empty() {
            return Err(MigrationError::EmptyLicenseKey);
        }
        Ok(MigrationTarget::Site {
            site,
            selector: LicenseSelector::Key(key),
        })
    }
}

fn validate_network(
    environment: &ClientEnvironment,
    sites: Vec<NetworkSiteRequest>,
) -> Result<MigrationTarget, MigrationError> {
    if sites.is_empty() {
        return Err(MigrationError::MissingParam { param: "sites" });
    }

    let mut validated = Vec::with_capacity(sites.len());
    for (site_index, site) in sites.into_iter().enumerate() {
        let uid = site_required(site.uid, site_index, "uid")?;
        let url = site_required(site.url, site_index, "url")?;
        let title = non_empty(site.title).unwrap_or_else(|| url.clone());
        let selector = match bundle_keys(site.children_license_keys) {
            Some(children) => Some(LicenseSelector::Bundle(children)),
            None => non_empty(site.license_key).map(LicenseSelector::Key),
        };
        validated.push(NetworkSite {
            site: environment.site(
                uid,
                url,
                title,
                non_empty(site.language),
                non_empty(site.charset),
            ),
            selector,
        });
    }

    if validated.iter().all(|site| site.selector.is_none()) {
        return Err(MigrationError::NoLicenseKeys);
    }
    Ok(MigrationTarget::Network { sites: validated })
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required(value: Option<String>, param: &'static str) -> Result<String, MigrationError> {
    non_empty(value).ok_or(MigrationError::MissingParam { param })
}

fn site_required(
    value: Option<String>,
    site_index: usize,
    param: &'static str,
) -> Result<String, MigrationError> {
    non_empty(value).ok_or(MigrationError::MissingSiteParam { site_index, param })
}

fn bundle_keys(keys: Option<Vec<String>>) -> Option<Vec<String>> {
    let keys = keys?
        .into_iter()
        .filter_map(|key| non_empty(Some(key)))
        .collect::<Vec<_>>();
    (!keys.is_empty()).then_some(keys)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn request(body: serde_json::Value) -> MigrationRequest {
        serde_json::from_value(body).expect("request should deserialize")
    }

    fn single_site() -> serde_json::Value {
        json!({
            "plugin_version": "3.1.0",
            "is_premium": true,
            "platform_version": "6.4.2",
            "php_version": "8.2",
            "site_uid": "abc",
            "site_url": "https://one.test",
            "site_name": "One",
            "language": "en-US",
            "charset": "UTF-8",
            "license_key": " KEY-1 "
        })
    }

    #[test]
    fn single_site_accepts_php_version_alias_and_trims_key() {
        let target = request(single_site()).validate().expect("valid request");
        let MigrationTarget::Site { site, selector } = target else {
            panic!("expected single-site target");
        };
        assert_eq!(site.programming_language_version, "8.2");
        assert_eq!(site.module_version, "3.1.0");
        assert_eq!(selector, LicenseSelector::Key("KEY-1".to_string()));
    }

    #[test]
    fn both_language_version_keys_prefer_the_current_name() {
        let mut body = single_site();
        body["programming_language_version"] = json!("8.3");
        let target = request(body).validate().expect("valid request");
        let MigrationTarget::Site { site, .. } = target else {
            panic!("expected single-site target");
        };
        assert_eq!(site.programming_language_version, "8.3");

        let mut body = single_site();
        body["programming_language_version"] = json!(" ");
        let target = request(body).validate().expect("valid request");
        let MigrationTarget::Site { site, .. } = target else {
            panic!("expected single-site target");
        };
        assert_eq!(site.programming_language_version, "8.2");
    }

    #[test]
    fn common_fields_are_checked_before_site_fields() {
        let mut body = single_site();
        body["site_url"] = json!("");
        body["platform_version"] = json!(null);
        let error = request(body).validate().expect_err("invalid request");
        assert!(matches!(error, MigrationError::MissingParam { param: "platform_version" }));
    }

    #[test]
    fn blank_license_key_is_reported_as_empty() {
        let mut body = single_site();
        body["license_key"] = json!("   ");
        let error = request(body).validate().expect_err("invalid request");
        assert!(matches!(error, MigrationError::EmptyLicenseKey));

        let mut body = single_site();
        body.as_object_mut().map(|body| body.remove("license_key"));
        let error = request(body).validate().expect_err("invalid request");
        assert!(matches!(error, MigrationError::MissingParam { param: "license_key" }));
    }

    #[test]
    fn children_keys_select_bundle_mode() {
        let mut body = single_site();
        body["children_license_keys"] = json!(["", "ADDON-1", "ADDON-2"]);
        let target = request(body).validate().expect("valid request");
        assert!(matches!(
            target,
            MigrationTarget::Site { selector: LicenseSelector::Bundle(ref keys), .. }
                if keys == &["ADDON-1", "ADDON-2"]
        ));
    }

    #[test]
    fn network_site_without_url_is_named() {
        let body = json!({
            "plugin_version": "3.1.0",
            "is_premium": false,
            "platform_version": "6.4.2",
            "programming_language_version": "8.2",
            "sites": [
                { "uid": "a", "url": "https://a.test", "license_key": "K" },
                { "uid": "b", "title": "B" }
            ]
        });
        let error = request(body).validate().expect_err("invalid request");
        assert!(matches!(
            error,
            MigrationError::MissingSiteParam { site_index: 1, param: "url" }
        ));
    }

    #[test]
    fn network_without_any_key_is_rejected() {
        let body = json!({
            "plugin_version": "3.1.0",
            "is_premium": false,
            "platform_version": "6.4.2",
            "programming_language_version": "8.2",
            "sites": [
                { "uid": "a", "url": "https://a.test" },
                { "uid": "b", "url": "https://b.test", "license_key": "" }
            ]
        });
        let error = request(body).validate().expect_err("invalid request");
        assert!(matches!(error, MigrationError::NoLicenseKeys));
    }
}
