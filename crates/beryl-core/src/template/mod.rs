//! Template catalog and descriptors.
//!
//! A template is a named bundle describing a policy, a directory manifest,
//! ordered identity and domain seed data, and optional assertions. The
//! catalog is a JSON document mapping template names to descriptors; asset
//! references inside a descriptor are either absolute URLs, local paths,
//! or paths relative to the catalog URL.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::config;

/// Errors raised while fetching or interpreting templates.
///
/// Any of these aborts a provisioning run before the instance is touched.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The catalog could not be fetched.
    #[error("failed to fetch template catalog from {url}")]
    Fetch {
        /// Catalog URL.
        url: String,
        /// Transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The catalog body is not valid JSON of the expected shape.
    #[error("failed to parse template catalog from {url}")]
    Parse {
        /// Catalog URL.
        url: String,
        /// Decode error.
        #[source]
        source: serde_json::Error,
    },

    /// The catalog URL itself is malformed.
    #[error("invalid catalog URL: {url}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
        /// Parse error.
        #[source]
        source: url::ParseError,
    },

    /// An asset reference could not be resolved against the catalog base.
    #[error("invalid asset reference {asset:?} in template {template}")]
    InvalidAssetRef {
        /// Template name.
        template: String,
        /// The offending reference.
        asset: String,
        /// Parse error.
        #[source]
        source: url::ParseError,
    },

    /// No template with the requested name exists in the catalog.
    #[error("template not found: {name}")]
    NotFound {
        /// The requested template name.
        name: String,
    },

    /// A user-supplied configuration name violates the restricted pattern.
    #[error("{name:?} is not a valid configuration name (alphanumerics, '-', '_' only)")]
    InvalidName {
        /// The offending name.
        name: String,
    },
}

/// Policy reference inside a template descriptor.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PolicyRef {
    /// Policy name, also the default configuration name.
    pub name: String,
    /// Policy image or bundle locator.
    pub resource: String,
}

/// Asset references of one template.
///
/// `identity_data` and `domain_data` are ordered and stay separate all the
/// way through the workflow: identity records must be imported before any
/// domain record that references them.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TemplateAssets {
    /// Policy bundle.
    pub policy: PolicyRef,
    /// Directory manifest reference.
    pub manifest: String,
    /// Identity seed data references, in import order.
    #[serde(default)]
    pub identity_data: Vec<String>,
    /// Domain seed data references, in import order.
    #[serde(default)]
    pub domain_data: Vec<String>,
    /// Assertion file references.
    #[serde(default)]
    pub assertions: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct CatalogEntry {
    #[serde(default)]
    description: String,
    assets: TemplateAssets,
}

/// One template, bound to the catalog it was fetched from.
///
/// Immutable for the duration of a provisioning run.
#[derive(Debug, Clone)]
pub struct Template {
    /// Template name, the catalog key.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Asset references.
    pub assets: TemplateAssets,
    base: Url,
}

impl Template {
    /// Resolves an asset reference to something the asset fetcher can use.
    ///
    /// Absolute URLs and existing local paths pass through unchanged;
    /// anything else is joined onto the catalog base URL.
    pub fn abs_ref(&self, asset: &str) -> Result<String, TemplateError> {
        if Url::parse(asset).is_ok() || Path::new(asset).exists() {
            return Ok(asset.to_string());
        }
        let joined = self
            .base
            .join(asset)
            .map_err(|source| TemplateError::InvalidAssetRef {
                template: self.name.clone(),
                asset: asset.to_string(),
                source,
            })?;
        Ok(joined.to_string())
    }
}

/// A fetched template catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    base: Url,
    entries: BTreeMap<String, CatalogEntry>,
}

impl Catalog {
    /// Fetches and parses the catalog at `url`.
    pub async fn fetch(http: &reqwest::Client, url: &str) -> Result<Self, TemplateError> {
        let body = http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|source| TemplateError::Fetch { url: url.to_string(), source })?
            .text()
            .await
            .map_err(|source| TemplateError::Fetch { url: url.to_string(), source })?;
        Self::from_json(url, &body)
    }

    /// Parses a catalog document fetched from `url`.
    pub fn from_json(url: &str, body: &str) -> Result<Self, TemplateError> {
        let base = Url::parse(url)
            .map_err(|source| TemplateError::InvalidUrl { url: url.to_string(), source })?;
        let entries: BTreeMap<String, CatalogEntry> = serde_json::from_str(body)
            .map_err(|source| TemplateError::Parse { url: url.to_string(), source })?;
        Ok(Self { base, entries })
    }

    /// Looks up a template by name.
    pub fn template(&self, name: &str) -> Result<Template, TemplateError> {
        let entry = self
            .entries
            .get(name)
            .ok_or_else(|| TemplateError::NotFound { name: name.to_string() })?;
        Ok(Template {
            name: name.to_string(),
            description: entry.description.clone(),
            assets: entry.assets.clone(),
            base: self.base.clone(),
        })
    }

    /// Template names and descriptions, sorted by name.
    pub fn list(&self) -> Vec<(&str, &str)> {
        self.entries
            .iter()
            .map(|(name, entry)| (name.as_str(), entry.description.as_str()))
            .collect()
    }
}

/// Validates a user-supplied configuration name override.
pub fn validate_config_name(name: &str) -> Result<(), TemplateError> {
    if config::is_restricted_name(name) {
        Ok(())
    } else {
        Err(TemplateError::InvalidName { name: name.to_string() })
    }
}
