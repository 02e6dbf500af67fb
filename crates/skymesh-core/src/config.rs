//! Process-wide settings.
//!
//! Everything is read from the environment; there are no positional
//! arguments. Defaults match a local single-node setup.

use std::env;

/// Environment variable naming the Spider base URL.
pub const ENV_SPIDER_REST_URL: &str = "SPIDER_REST_URL";
/// Environment variable naming the system-common namespace.
pub const ENV_SYSTEM_COMMON_NS: &str = "SYSTEM_COMMON_NS";
/// Environment variable naming the default credential holder.
pub const ENV_DEFAULT_CREDENTIAL_HOLDER: &str = "DEFAULT_CREDENTIAL_HOLDER";

/// Settings shared by the orchestration crates.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base URL of the Spider CSP-abstraction service.
    pub spider_rest_url: String,
    /// Namespace holding system-owned spec/image catalog entries.
    pub system_common_ns: String,
    /// Credential holder consulted when listing connections.
    pub default_credential_holder: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            spider_rest_url: "http://localhost:1024/spider".to_string(),
            system_common_ns: "system-purpose-common-ns".to_string(),
            default_credential_holder: "admin".to_string(),
        }
    }
}

impl Settings {
    /// Build settings from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            spider_rest_url: env::var(ENV_SPIDER_REST_URL)
                .unwrap_or(defaults.spider_rest_url),
            system_common_ns: env::var(ENV_SYSTEM_COMMON_NS)
                .unwrap_or(defaults.system_common_ns),
            default_credential_holder: env::var(ENV_DEFAULT_CREDENTIAL_HOLDER)
                .unwrap_or(defaults.default_credential_holder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_local() {
        let settings = Settings::default();
        assert!(settings.spider_rest_url.starts_with("http://localhost"));
        assert_eq!(settings.default_credential_holder, "admin");
    }
}
