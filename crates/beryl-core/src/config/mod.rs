//! Environment defaulting and filesystem layout.
//!
//! Every CLI flag that talks to a running instance has an environment
//! fallback and a compiled-in default, resolved in that order. The beryl
//! home directory holds the CLI state file, rendered instance
//! configurations, and the template asset cache.

use std::env;
use std::path::PathBuf;

/// Default template catalog location.
pub const DEFAULT_CATALOG_URL: &str = "https://templates.beryl.dev/catalog.json";

/// Health service name checked during provisioning.
pub const HEALTH_SERVICE: &str = "model";

const DEFAULT_DIRECTORY_SVC: &str = "localhost:9292";
const DEFAULT_GATEWAY_SVC: &str = "https://localhost:9393";
const DEFAULT_HEALTH_SVC: &str = "localhost:9494";
const DEFAULT_CONSOLE_URL: &str = "https://localhost:8080/ui/directory";

const DEFAULT_CONTAINER_REGISTRY: &str = "ghcr.io/beryl-hq";
const DEFAULT_CONTAINER_IMAGE: &str = "beryl";
const DEFAULT_CONTAINER_TAG: &str = "latest";
const DEFAULT_CONTAINER_NAME: &str = "beryl";

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Directory service gRPC address (`BERYL_DIRECTORY_SVC`).
pub fn directory_svc() -> String {
    env_or("BERYL_DIRECTORY_SVC", DEFAULT_DIRECTORY_SVC)
}

/// Directory REST gateway base URL (`BERYL_GATEWAY_SVC`).
pub fn gateway_svc() -> String {
    env_or("BERYL_GATEWAY_SVC", DEFAULT_GATEWAY_SVC)
}

/// gRPC health endpoint address (`BERYL_HEALTH_SVC`).
pub fn health_svc() -> String {
    env_or("BERYL_HEALTH_SVC", DEFAULT_HEALTH_SVC)
}

/// Console URL opened after a successful install (`BERYL_CONSOLE_URL`).
pub fn console_url() -> String {
    env_or("BERYL_CONSOLE_URL", DEFAULT_CONSOLE_URL)
}

/// Container registry, `host[:port]/repo` (`CONTAINER_REGISTRY`).
pub fn container_registry() -> String {
    env_or("CONTAINER_REGISTRY", DEFAULT_CONTAINER_REGISTRY)
}

/// Container image name (`CONTAINER_IMAGE`).
pub fn container_image() -> String {
    env_or("CONTAINER_IMAGE", DEFAULT_CONTAINER_IMAGE)
}

/// Container tag (`CONTAINER_TAG`).
pub fn container_tag() -> String {
    env_or("CONTAINER_TAG", DEFAULT_CONTAINER_TAG)
}

/// Container platform (`CONTAINER_PLATFORM`), e.g. `linux/amd64`.
pub fn container_platform() -> String {
    env_or("CONTAINER_PLATFORM", &format!("linux/{}", std::env::consts::ARCH))
}

/// Container instance name (`CONTAINER_NAME`).
///
/// Instances provisioned from a non-default configuration get a
/// `beryl-<config>` name so they can coexist with the default instance.
pub fn container_name(config_name: &str) -> String {
    if let Ok(name) = env::var("CONTAINER_NAME") {
        return name;
    }
    if config_name == DEFAULT_CONTAINER_NAME {
        DEFAULT_CONTAINER_NAME.to_string()
    } else {
        format!("{DEFAULT_CONTAINER_NAME}-{config_name}")
    }
}

/// Fully qualified container reference, `registry/image:tag`.
///
/// Empty arguments fall back to the environment/default chain; a
/// `CONTAINER` environment variable overrides everything.
pub fn container_ref(registry: &str, image: &str, tag: &str) -> String {
    if let Ok(all) = env::var("CONTAINER") {
        return all;
    }
    let registry = if registry.is_empty() { container_registry() } else { registry.to_string() };
    let image = if image.is_empty() { container_image() } else { image.to_string() };
    let tag = if tag.is_empty() { container_tag() } else { tag.to_string() };
    format!("{registry}/{image}:{tag}")
}

/// Beryl home directory.
///
/// `BERYL_DIR`, then `$XDG_CONFIG_HOME/beryl`, then `$HOME/.config/beryl`,
/// falling back to `/tmp/beryl` in environments without a home.
pub fn beryl_dir() -> PathBuf {
    if let Ok(dir) = env::var("BERYL_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("beryl");
    }
    env::var("HOME").map_or_else(
        |_| PathBuf::from("/tmp/beryl"),
        |home| PathBuf::from(home).join(".config").join("beryl"),
    )
}

/// Directory holding rendered instance configuration files.
pub fn cfg_dir() -> PathBuf {
    beryl_dir().join("cfg")
}

/// Root of the template asset cache.
pub fn templates_dir() -> PathBuf {
    beryl_dir().join("templates")
}

/// Whether a user-supplied configuration name is acceptable.
///
/// Names become file names and container names, so they are restricted to
/// alphanumerics, `-`, and `_`, starting with an alphanumeric.
pub fn is_restricted_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {},
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restricted_names() {
        assert!(is_restricted_name("acme"));
        assert!(is_restricted_name("acme-v2"));
        assert!(is_restricted_name("acme_v2"));
        assert!(is_restricted_name("0main"));
        assert!(!is_restricted_name(""));
        assert!(!is_restricted_name("-acme"));
        assert!(!is_restricted_name("acme/../etc"));
        assert!(!is_restricted_name("acme template"));
    }

    #[test]
    fn container_name_for_default_config() {
        // CONTAINER_NAME is not set in the test environment.
        assert_eq!(container_name("beryl"), "beryl");
        assert_eq!(container_name("acme"), "beryl-acme");
    }

    #[test]
    fn container_ref_uses_explicit_parts() {
        let full = container_ref("ghcr.io/example", "authz", "1.2.3");
        assert_eq!(full, "ghcr.io/example/authz:1.2.3");
    }
}
