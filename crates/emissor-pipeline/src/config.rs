use std::time::Duration;

use emissor_transport::RetryPolicy;
use emissor_types::{Environment, LedgerIdentity};

/// Where and how long to wait for the remote submission service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EndpointConfig {
    pub submit_url: String,
    /// Per-attempt timeout.
    pub timeout: Duration,
}

impl EndpointConfig {
    pub const STAGING_SUBMIT_URL: &'static str =
        "https://sefin.producaorestrita.nfse.gov.br/SefinNacional/nfse";
    pub const PRODUCTION_SUBMIT_URL: &'static str = "https://sefin.nfse.gov.br/SefinNacional/nfse";

    pub fn for_environment(environment: Environment) -> Self {
        let submit_url = match environment {
            Environment::Staging => Self::STAGING_SUBMIT_URL,
            Environment::Production => Self::PRODUCTION_SUBMIT_URL,
        };
        Self {
            submit_url: submit_url.to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self::for_environment(Environment::Staging)
    }
}

/// Configuration for one [`Orchestrator`](crate::Orchestrator).
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    pub identity: LedgerIdentity,
    pub endpoint: EndpointConfig,
    pub submission_policy: RetryPolicy,
    /// `cStat` values that mean the document was accepted.
    pub accepted_status_codes: Vec<String>,
}

impl OrchestratorConfig {
    pub fn new(identity: LedgerIdentity) -> Self {
        Self {
            endpoint: EndpointConfig::for_environment(identity.environment),
            identity,
            submission_policy: RetryPolicy::submission(),
            accepted_status_codes: vec!["100".to_string()],
        }
    }

    pub fn with_endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_submission_policy(mut self, policy: RetryPolicy) -> Self {
        self.submission_policy = policy;
        self
    }
}
