use crate::error::{Error, Result};
use crate::health::DEFAULT_HEALTH_TIMEOUT;
use crate::types::{RunContext, RunId};
use std::env;
use std::time::Duration;
use uuid::Uuid;

pub const RUN_ID_VAR: &str = "MITTONS_FIXTURES_RUN_ID";
pub const TEARDOWN_VAR: &str = "MITTONS_FIXTURES_TEARDOWN";
pub const DOCKER_VAR: &str = "MITTONS_FIXTURES_DOCKER";
pub const HEALTH_TIMEOUT_VAR: &str = "MITTONS_FIXTURES_HEALTH_TIMEOUT_MS";
pub const COMMAND_TIMEOUT_VAR: &str = "MITTONS_FIXTURES_COMMAND_TIMEOUT_MS";

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Run-wide configuration, read from the process environment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    pub run_id: RunId,
    pub teardown_on_complete: bool,
    pub docker: String,
    pub health_timeout: Duration,
    pub command_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            teardown_on_complete: true,
            docker: "docker".to_string(),
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl Settings {
    /// Reads settings from `MITTONS_FIXTURES_*` variables. A run id is
    /// generated when none is set, so every run gets its own label.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Settings::default();
        let value = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        Ok(Self {
            run_id: value(RUN_ID_VAR).unwrap_or(defaults.run_id),
            teardown_on_complete: match value(TEARDOWN_VAR) {
                Some(raw) => parse_bool(TEARDOWN_VAR, &raw)?,
                None => defaults.teardown_on_complete,
            },
            docker: value(DOCKER_VAR).unwrap_or(defaults.docker),
            health_timeout: match value(HEALTH_TIMEOUT_VAR) {
                Some(raw) => parse_millis(HEALTH_TIMEOUT_VAR, &raw)?,
                None => defaults.health_timeout,
            },
            command_timeout: match value(COMMAND_TIMEOUT_VAR) {
                Some(raw) => parse_millis(COMMAND_TIMEOUT_VAR, &raw)?,
                None => defaults.command_timeout,
            },
        })
    }

    pub fn run_context(&self) -> RunContext {
        RunContext::new(self.run_id.clone(), self.teardown_on_complete)
    }
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!("{name} must be a boolean, got `{other}`"))),
    }
}

fn parse_millis(name: &str, raw: &str) -> Result<Duration> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|err| Error::Config(format!("{name} must be a number of milliseconds: {err}")))
}
