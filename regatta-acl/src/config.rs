//! Server configuration consulted by the ACL core.
//!
//! Mirrors the agent's configuration discipline: a serde DTO layer reads the
//! JSON file, [`Conf::from_conf_file`] validates it into the runtime shape,
//! and [`ConfHandle`] hands out `Arc<Conf>` images that stay valid while a
//! reload swaps the current one.

use std::sync::Arc;

use anyhow::Context as _;
use camino::Utf8PathBuf;
use parking_lot::RwLock;
use smol_str::SmolStr;
use time::Duration;

const DEFAULT_TOKEN_MIN_EXPIRATION_TTL: Duration = Duration::minutes(1);
const DEFAULT_TOKEN_MAX_EXPIRATION_TTL: Duration = Duration::hours(24);

#[derive(Debug, Clone)]
pub struct Conf {
    /// Server data directory; the bootstrap reset sentinel lives here.
    pub data_dir: Utf8PathBuf,
    /// Region this server is authoritative for.
    pub region: SmolStr,
    /// PEM public keys accepted for cluster-signed workload identity JWTs.
    pub identity_pub_keys: Vec<String>,
    pub acl: AclConf,
}

#[derive(Debug, Clone)]
pub struct AclConf {
    /// Master switch. When false every RPC succeeds without authorization
    /// and resolution returns the all-permit sentinel.
    pub enabled: bool,
    pub token_min_expiration_ttl: Duration,
    pub token_max_expiration_ttl: Duration,
    /// Honored by downstream integrations that may skip token checks.
    pub allow_unauthenticated: bool,
}

impl Conf {
    pub fn from_conf_file(conf_file: &dto::ConfFile) -> anyhow::Result<Self> {
        let acl = conf_file.acl.clone().unwrap_or_default();

        let token_min_expiration_ttl = acl
            .token_min_expiration_ttl_secs
            .map_or(DEFAULT_TOKEN_MIN_EXPIRATION_TTL, |secs| Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)));
        let token_max_expiration_ttl = acl
            .token_max_expiration_ttl_secs
            .map_or(DEFAULT_TOKEN_MAX_EXPIRATION_TTL, |secs| Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)));

        if token_max_expiration_ttl < token_min_expiration_ttl {
            anyhow::bail!("ACL token max expiration TTL is below the min expiration TTL");
        }

        Ok(Conf {
            data_dir: conf_file.data_dir.clone(),
            region: conf_file.region.clone().unwrap_or_else(|| SmolStr::new_static("global")),
            identity_pub_keys: conf_file.identity_pub_keys.clone().unwrap_or_default(),
            acl: AclConf {
                enabled: acl.enabled,
                token_min_expiration_ttl,
                token_max_expiration_ttl,
                allow_unauthenticated: acl.allow_unauthenticated,
            },
        })
    }
}

impl Default for AclConf {
    fn default() -> Self {
        AclConf {
            enabled: false,
            token_min_expiration_ttl: DEFAULT_TOKEN_MIN_EXPIRATION_TTL,
            token_max_expiration_ttl: DEFAULT_TOKEN_MAX_EXPIRATION_TTL,
            allow_unauthenticated: false,
        }
    }
}

/// Shared handle over the current configuration.
#[derive(Clone)]
pub struct ConfHandle {
    inner: Arc<RwLock<Arc<Conf>>>,
}

impl ConfHandle {
    pub fn new(conf: Conf) -> Self {
        ConfHandle {
            inner: Arc::new(RwLock::new(Arc::new(conf))),
        }
    }

    pub fn from_json(json_config: &str) -> anyhow::Result<Self> {
        let conf_file = serde_json::from_str::<dto::ConfFile>(json_config).context("invalid JSON config")?;
        let conf = Conf::from_conf_file(&conf_file)?;
        Ok(ConfHandle::new(conf))
    }

    /// Current configuration image; cheap, safe to hold across awaits.
    pub fn get_conf(&self) -> Arc<Conf> {
        Arc::clone(&self.inner.read())
    }

    /// Installs a new configuration. Readers holding the previous image are
    /// unaffected.
    pub fn set_conf(&self, conf: Conf) {
        *self.inner.write() = Arc::new(conf);
    }
}

pub mod dto {
    use serde::{Deserialize, Serialize};

    use super::*;

    /// On-disk configuration shape, limited to what the ACL core consumes.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct ConfFile {
        pub data_dir: Utf8PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub region: Option<SmolStr>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub identity_pub_keys: Option<Vec<String>>,
        #[serde(rename = "ACL", default, skip_serializing_if = "Option::is_none")]
        pub acl: Option<AclSection>,
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    #[serde(rename_all = "PascalCase")]
    pub struct AclSection {
        #[serde(default)]
        pub enabled: bool,
        #[serde(rename = "TokenMinExpirationTTL", default, skip_serializing_if = "Option::is_none")]
        pub token_min_expiration_ttl_secs: Option<u64>,
        #[serde(rename = "TokenMaxExpirationTTL", default, skip_serializing_if = "Option::is_none")]
        pub token_max_expiration_ttl_secs: Option<u64>,
        #[serde(default)]
        pub allow_unauthenticated: bool,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_config() {
        let handle = ConfHandle::from_json(r#"{ "DataDir": "/var/lib/regatta" }"#).expect("valid config");
        let conf = handle.get_conf();
        assert_eq!(conf.data_dir, Utf8PathBuf::from("/var/lib/regatta"));
        assert_eq!(conf.region, "global");
        assert!(!conf.acl.enabled);
        assert_eq!(conf.acl.token_min_expiration_ttl, DEFAULT_TOKEN_MIN_EXPIRATION_TTL);
    }

    #[test]
    fn loads_acl_section() {
        let handle = ConfHandle::from_json(
            r#"{
                "DataDir": "/tmp/r",
                "Region": "eu-west",
                "ACL": { "Enabled": true, "TokenMinExpirationTTL": 30, "TokenMaxExpirationTTL": 600 }
            }"#,
        )
        .expect("valid config");
        let conf = handle.get_conf();
        assert!(conf.acl.enabled);
        assert_eq!(conf.region, "eu-west");
        assert_eq!(conf.acl.token_min_expiration_ttl, Duration::seconds(30));
        assert_eq!(conf.acl.token_max_expiration_ttl, Duration::seconds(600));
    }

    #[test]
    fn rejects_inverted_ttl_bounds() {
        let result = ConfHandle::from_json(
            r#"{ "DataDir": "/tmp/r", "ACL": { "TokenMinExpirationTTL": 600, "TokenMaxExpirationTTL": 30 } }"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn set_conf_swaps_image() {
        let handle = ConfHandle::from_json(r#"{ "DataDir": "/tmp/r" }"#).expect("valid config");
        let before = handle.get_conf();

        let mut updated = (*before).clone();
        updated.acl.enabled = true;
        handle.set_conf(updated);

        assert!(!before.acl.enabled);
        assert!(handle.get_conf().acl.enabled);
    }
}
