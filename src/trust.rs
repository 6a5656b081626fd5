//! Transport trust and authentication for remote repositories.
//!
//! Git is driven as a subprocess, so both the certificate policy and the
//! credentials are expressed as per-invocation git configuration. They are
//! passed through `GIT_CONFIG_COUNT` / `GIT_CONFIG_KEY_n` / `GIT_CONFIG_VALUE_n`
//! environment variables rather than `-c` arguments so that secrets never
//! appear in the process list.
//!
//! | Policy | Git configuration |
//! |--------|-------------------|
//! | [`StrictTrust`] | none (system defaults) |
//! | [`AcceptAnyCertificate`] | `http.sslVerify=false` |
//! | [`CaBundleTrust`] | `http.sslCAInfo=<bundle>` |

use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::config::TrustSetting;
use repo_warehouse_core::models::Credentials;

/// Certificate validation policy applied to remote transports.
pub trait TrustPolicy: Send + Sync {
    /// Short policy name used in logs.
    fn name(&self) -> &'static str;

    /// Git configuration entries (`key`, `value`) this policy requires.
    fn git_config(&self) -> Vec<(String, String)>;
}

/// Full certificate verification against the system store.
pub struct StrictTrust;

impl TrustPolicy for StrictTrust {
    fn name(&self) -> &'static str {
        "strict"
    }

    fn git_config(&self) -> Vec<(String, String)> {
        Vec::new()
    }
}

/// Disables certificate verification. Opt-in only.
pub struct AcceptAnyCertificate;

impl TrustPolicy for AcceptAnyCertificate {
    fn name(&self) -> &'static str {
        "accept-any"
    }

    fn git_config(&self) -> Vec<(String, String)> {
        vec![("http.sslVerify".to_string(), "false".to_string())]
    }
}

/// Verification against an additional CA bundle (e.g. a corporate root).
pub struct CaBundleTrust {
    pub bundle: PathBuf,
}

impl TrustPolicy for CaBundleTrust {
    fn name(&self) -> &'static str {
        "ca-bundle"
    }

    fn git_config(&self) -> Vec<(String, String)> {
        vec![(
            "http.sslCAInfo".to_string(),
            self.bundle.to_string_lossy().to_string(),
        )]
    }
}

/// Build the policy selected by `[sync] trust`.
pub fn from_setting(setting: &TrustSetting) -> Arc<dyn TrustPolicy> {
    match setting {
        TrustSetting::Strict => Arc::new(StrictTrust),
        TrustSetting::AcceptAny => {
            tracing::warn!("certificate verification is disabled for remote repositories");
            Arc::new(AcceptAnyCertificate)
        }
        TrustSetting::CaBundle(bundle) => Arc::new(CaBundleTrust {
            bundle: bundle.clone(),
        }),
    }
}

/// Everything a single remote git invocation needs beyond its arguments.
#[derive(Clone)]
pub struct Transport {
    trust: Arc<dyn TrustPolicy>,
    credentials: Option<Credentials>,
}

impl Transport {
    pub fn new(trust: Arc<dyn TrustPolicy>) -> Self {
        Self {
            trust,
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn policy_name(&self) -> &'static str {
        self.trust.name()
    }

    /// All configuration entries: trust policy first, then authorization.
    pub fn git_config(&self) -> Vec<(String, String)> {
        let mut entries = self.trust.git_config();
        if let Some(creds) = &self.credentials {
            entries.push((
                "http.extraHeader".to_string(),
                format!("Authorization: {}", basic_authorization(creds)),
            ));
        }
        entries
    }

    /// Attach the configuration to `cmd` through the environment.
    pub fn apply(&self, cmd: &mut Command) {
        let entries = self.git_config();
        if entries.is_empty() {
            return;
        }
        cmd.env("GIT_CONFIG_COUNT", entries.len().to_string());
        for (i, (key, value)) in entries.iter().enumerate() {
            cmd.env(format!("GIT_CONFIG_KEY_{}", i), key);
            cmd.env(format!("GIT_CONFIG_VALUE_{}", i), value);
        }
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new(Arc::new(StrictTrust))
    }
}

/// `Basic <base64(username:password)>`.
pub fn basic_authorization(credentials: &Credentials) -> String {
    let raw = format!("{}:{}", credentials.username, credentials.password);
    format!("Basic {}", STANDARD.encode(raw.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> Credentials {
        Credentials {
            username: "alice".to_string(),
            password: "s3cret".to_string(),
            email: None,
        }
    }

    #[test]
    fn strict_adds_no_configuration() {
        assert!(Transport::default().git_config().is_empty());
    }

    #[test]
    fn accept_any_disables_verification() {
        let transport = Transport::new(from_setting(&TrustSetting::AcceptAny));
        assert_eq!(
            transport.git_config(),
            vec![("http.sslVerify".to_string(), "false".to_string())]
        );
        assert_eq!(transport.policy_name(), "accept-any");
    }

    #[test]
    fn ca_bundle_points_git_at_the_file() {
        let transport = Transport::new(from_setting(&TrustSetting::CaBundle(PathBuf::from(
            "/etc/ssl/corp.pem",
        ))));
        assert_eq!(transport.git_config()[0].0, "http.sslCAInfo");
        assert_eq!(transport.git_config()[0].1, "/etc/ssl/corp.pem");
    }

    #[test]
    fn credentials_become_basic_header() {
        assert_eq!(basic_authorization(&creds()), "Basic YWxpY2U6czNjcmV0");

        let transport = Transport::default().with_credentials(Some(creds()));
        let entries = transport.git_config();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].0, "http.extraHeader");
        assert_eq!(entries[0].1, "Authorization: Basic YWxpY2U6czNjcmV0");
    }

    #[test]
    fn apply_sets_indexed_environment() {
        let transport =
            Transport::new(Arc::new(AcceptAnyCertificate)).with_credentials(Some(creds()));
        let mut cmd = Command::new("git");
        transport.apply(&mut cmd);

        let envs: Vec<(String, String)> = cmd
            .get_envs()
            .filter_map(|(k, v)| {
                Some((
                    k.to_string_lossy().to_string(),
                    v?.to_string_lossy().to_string(),
                ))
            })
            .collect();
        assert!(envs.contains(&("GIT_CONFIG_COUNT".to_string(), "2".to_string())));
        assert!(envs.contains(&("GIT_CONFIG_KEY_0".to_string(), "http.sslVerify".to_string())));
        assert!(envs.contains(&("GIT_CONFIG_KEY_1".to_string(), "http.extraHeader".to_string())));
    }
}
