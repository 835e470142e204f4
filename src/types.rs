use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

pub type ServiceId = String;
pub type NetworkId = String;
pub type RunId = String;

/// Label attached to every service and network created for a run.
pub const RUN_ID_LABEL: &str = "mittons.fixtures.run.id";

/// Identifies one test run. Shared read-only by everything it labels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub id: RunId,
    pub teardown_on_complete: bool,
}

impl RunContext {
    pub fn new(id: impl Into<RunId>, teardown_on_complete: bool) -> Self {
        Self {
            id: id.into(),
            teardown_on_complete,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PullPolicy {
    #[default]
    Missing,
    Always,
    Never,
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PullPolicy::Missing => f.write_str("missing"),
            PullPolicy::Always => f.write_str("always"),
            PullPolicy::Never => f.write_str("never"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Image {
    pub name: String,
    pub pull_policy: PullPolicy,
}

impl Image {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pull_policy: PullPolicy::default(),
        }
    }

    pub fn with_pull_policy(mut self, pull_policy: PullPolicy) -> Self {
        self.pull_policy = pull_policy;
        self
    }
}

/// Runtime-level health check configuration for a service.
///
/// When `disabled` is set the remaining fields are ignored and the service is
/// presumed ready as soon as it has been created.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HealthCheckSpec {
    pub disabled: bool,
    pub command: Option<String>,
    pub interval: Option<Duration>,
    pub timeout: Option<Duration>,
    pub start_period: Option<Duration>,
    pub retries: Option<u32>,
}

impl HealthCheckSpec {
    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Default::default()
        }
    }

    pub fn command(command: impl Into<String>) -> Self {
        Self {
            command: Some(command.into()),
            ..Default::default()
        }
    }
}

/// Attaches a service to a declared network under an alias.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkAttachment {
    pub network: String,
    pub alias: String,
}

impl NetworkAttachment {
    pub fn new(network: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            network: network.into(),
            alias: alias.into(),
        }
    }
}

/// One typed configuration fact attached to a service or network declaration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Directive {
    Image(Image),
    Command(Vec<String>),
    HealthCheck(HealthCheckSpec),
    Run(RunContext),
    Network(String),
    NetworkAttachment(NetworkAttachment),
}

impl Directive {
    pub fn image(name: impl Into<String>) -> Self {
        Directive::Image(Image::new(name))
    }

    /// Splits `command` on whitespace into its arguments. Quotes are not
    /// interpreted; build `Directive::Command` from an argument list when an
    /// argument contains spaces.
    pub fn command(command: &str) -> Self {
        Directive::Command(command.split_whitespace().map(str::to_string).collect())
    }

    pub fn network(name: impl Into<String>) -> Self {
        Directive::Network(name.into())
    }

    pub fn attach(network: impl Into<String>, alias: impl Into<String>) -> Self {
        Directive::NetworkAttachment(NetworkAttachment::new(network, alias))
    }
}

/// Health as reported by the runtime.
///
/// Only `Running` and `Healthy` end a readiness wait; `Unknown` never does.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    #[default]
    Unknown,
    Running,
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    pub fn is_ready(self) -> bool {
        matches!(self, HealthStatus::Running | HealthStatus::Healthy)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Unknown => f.write_str("unknown"),
            HealthStatus::Running => f.write_str("running"),
            HealthStatus::Healthy => f.write_str("healthy"),
            HealthStatus::Unhealthy => f.write_str("unhealthy"),
        }
    }
}

/// A discovered communication endpoint of a running service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceResource {
    /// Endpoint as seen inside the service. A trailing `/` in the path marks a directory.
    pub guest_uri: Url,
    /// Endpoint through which the test process reaches the same resource.
    pub host_uri: Url,
}

impl ServiceResource {
    pub fn new(guest_uri: Url, host_uri: Url) -> Self {
        Self {
            guest_uri,
            host_uri,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.guest_uri.path().ends_with('/')
    }
}

/// Lifecycle of a service or network owned by an environment.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum ServiceState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
    Failed,
    Disposed,
}
