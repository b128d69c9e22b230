use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use emissor_pipeline::{EndpointConfig, OrchestratorConfig};
use emissor_transport::RetryPolicy;
use emissor_types::{Client, Environment, Intermediary, Issuer, LedgerIdentity};

/// Contents of `emissor.toml`.
///
/// Relative paths are resolved against the directory holding the file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default = "defaults::data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "defaults::environment")]
    pub environment: Environment,
    /// Signing credential (`keygen` output or an exported certificate).
    pub credential: PathBuf,
    pub trust_store: PathBuf,
    /// PEM bundle (certificate chain and private key) presented for mutual TLS.
    #[serde(default)]
    pub client_identity: Option<PathBuf>,
    #[serde(default = "defaults::export_dir")]
    pub export_dir: PathBuf,
    #[serde(default)]
    pub endpoints: EndpointSettings,
    pub issuer: Issuer,
    #[serde(default)]
    pub clients: Vec<Client>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointSettings {
    pub staging: Option<String>,
    pub production: Option<String>,
    #[serde(default = "defaults::timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "defaults::max_attempts")]
    pub max_attempts: u32,
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            staging: None,
            production: None,
            timeout_secs: defaults::timeout_secs(),
            max_attempts: defaults::max_attempts(),
        }
    }
}

mod defaults {
    use super::*;

    pub fn data_dir() -> PathBuf {
        PathBuf::from("data")
    }
    pub fn export_dir() -> PathBuf {
        PathBuf::from("exports")
    }
    pub fn environment() -> Environment {
        Environment::Staging
    }
    pub fn timeout_secs() -> u64 {
        60
    }
    pub fn max_attempts() -> u32 {
        3
    }
}

impl Settings {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read configuration {}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&raw, base).with_context(|| format!("invalid configuration {}", path.display()))
    }

    pub fn parse(raw: &str, base: &Path) -> anyhow::Result<Self> {
        let mut settings: Settings = toml::from_str(raw)?;
        for path in [
            &mut settings.data_dir,
            &mut settings.credential,
            &mut settings.trust_store,
            &mut settings.export_dir,
        ]
        .into_iter()
        .chain(settings.client_identity.as_mut())
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        Ok(settings)
    }

    pub fn identity(&self) -> LedgerIdentity {
        LedgerIdentity::new(self.issuer.tax_id.clone(), self.environment)
    }

    pub fn client(&self, id: &str) -> Option<&Client> {
        self.clients.iter().find(|c| c.id.as_str() == id)
    }

    /// A configured client acting as intermediary.
    pub fn intermediary(&self, id: &str) -> Option<Intermediary> {
        self.client(id).map(Intermediary::from)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let mut endpoint = EndpointConfig::for_environment(self.environment);
        let configured = match self.environment {
            Environment::Staging => &self.endpoints.staging,
            Environment::Production => &self.endpoints.production,
        };
        if let Some(url) = configured {
            endpoint.submit_url = url.clone();
        }
        endpoint.timeout = Duration::from_secs(self.endpoints.timeout_secs);

        OrchestratorConfig::new(self.identity())
            .with_endpoint(endpoint)
            .with_submission_policy(
                RetryPolicy::submission().with_max_attempts(self.endpoints.max_attempts),
            )
    }
}
