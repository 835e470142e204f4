//! [`RuntimeGateway`] over the `docker` command line.

use crate::directives::ServiceSpec;
use crate::error::{Error, Result};
use crate::gateway::{ResourceListing, RuntimeGateway};
use crate::settings::Settings;
use crate::types::{HealthCheckSpec, HealthStatus, NetworkId, ServiceId};
use crate::utils::whole_seconds;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

lazy_static! {
    static ref PORT_KEY: Regex =
        Regex::new(r"^(?P<port>\d+)/(?P<protocol>[a-z]+)$").expect("port key pattern is valid");
}

const PUBLISHED_HOST: &str = "127.0.0.1";

#[derive(Clone, Debug)]
pub struct DockerGateway {
    binary: String,
    command_timeout: Duration,
}

impl DockerGateway {
    pub fn new(binary: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            command_timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.docker.clone(), settings.command_timeout)
    }

    /// Runs one CLI invocation and returns its stdout.
    ///
    /// The child is killed when the call is cancelled or exceeds the command
    /// timeout.
    async fn docker(&self, args: &[String], cancel: &CancellationToken) -> Result<Vec<u8>> {
        let described = format!("{} {}", self.binary, args.join(" "));
        trace!(command = %described, "running");

        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| Error::Runtime {
                command: described.clone(),
                message: err.to_string(),
            })?;

        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled(described)),
            _ = tokio::time::sleep(self.command_timeout) => {
                return Err(Error::Runtime {
                    command: described,
                    message: format!("timed out after {:?}", self.command_timeout),
                })
            }
            output = child.wait_with_output() => output?,
        };

        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(Error::Runtime {
                command: described,
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }

    async fn inspect(&self, service_id: &str, cancel: &CancellationToken) -> Result<ContainerInspect> {
        let stdout = self
            .docker(&args(["inspect", "--type", "container", service_id]), cancel)
            .await?;
        let mut containers: Vec<ContainerInspect> = serde_json::from_slice(&stdout)?;
        if containers.is_empty() {
            return Err(Error::Runtime {
                command: format!("{} inspect {service_id}", self.binary),
                message: "no such container".to_string(),
            });
        }
        Ok(containers.swap_remove(0))
    }

    async fn exec(
        &self,
        service_id: &str,
        command: &[&str],
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        let mut exec = args(["exec", service_id]);
        exec.extend(command.iter().map(|arg| arg.to_string()));
        self.docker(&exec, cancel).await
    }
}

fn args<const N: usize>(args: [&str; N]) -> Vec<String> {
    args.iter().map(|arg| arg.to_string()).collect()
}

/// Arguments of `docker run` for `spec`.
pub fn run_args(spec: &ServiceSpec) -> Vec<String> {
    let mut run = args(["run", "--detach", "--publish-all"]);
    run.push("--pull".to_string());
    run.push(spec.pull_policy.to_string());
    for (key, value) in &spec.labels {
        run.push("--label".to_string());
        run.push(format!("{key}={value}"));
    }
    if let Some(health_check) = &spec.health_check {
        run.extend(health_args(health_check));
    }
    run.push(spec.image.clone());
    run.extend(spec.command.iter().cloned());
    run
}

/// Health flags for `docker run`. Durations are passed in whole seconds,
/// rounded up; options that were not supplied are left to the image.
pub fn health_args(health_check: &HealthCheckSpec) -> Vec<String> {
    if health_check.disabled {
        return vec!["--no-healthcheck".to_string()];
    }

    let mut flags = vec![];
    if let Some(command) = &health_check.command {
        flags.push("--health-cmd".to_string());
        flags.push(command.clone());
    }
    let durations = [
        ("--health-interval", health_check.interval),
        ("--health-timeout", health_check.timeout),
        ("--health-start-period", health_check.start_period),
    ];
    for (flag, duration) in durations {
        if let Some(duration) = duration {
            flags.push(flag.to_string());
            flags.push(format!("{}s", whole_seconds(duration)));
        }
    }
    if let Some(retries) = health_check.retries {
        flags.push("--health-retries".to_string());
        flags.push(retries.to_string());
    }
    flags
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerInspect {
    state: ContainerState,
    #[serde(default)]
    network_settings: NetworkSettings,
    #[serde(default)]
    mounts: Vec<Mount>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerState {
    #[serde(default)]
    status: String,
    health: Option<ContainerHealth>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ContainerHealth {
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NetworkSettings {
    #[serde(default)]
    ports: Option<BTreeMap<String, Option<Vec<PortBinding>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PortBinding {
    #[serde(default)]
    host_ip: String,
    host_port: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Mount {
    source: String,
    destination: String,
}

impl ContainerInspect {
    fn health_status(&self) -> HealthStatus {
        match (&self.state.health, self.state.status.as_str()) {
            (Some(health), _) => match health.status.as_str() {
                "healthy" => HealthStatus::Healthy,
                "unhealthy" => HealthStatus::Unhealthy,
                _ => HealthStatus::Unknown,
            },
            (None, "running") => HealthStatus::Running,
            (None, _) => HealthStatus::Unknown,
        }
    }

    fn resources(&self) -> Result<Vec<ResourceListing>> {
        let mut listing = vec![];

        for (key, bindings) in self.network_settings.ports.iter().flatten() {
            let Some(captures) = PORT_KEY.captures(key) else {
                debug!(%key, "skipping unrecognized port key");
                continue;
            };
            let published = bindings
                .iter()
                .flatten()
                .find(|binding| !binding.host_ip.contains(':'));
            let Some(published) = published else {
                continue;
            };
            let protocol = &captures["protocol"];
            listing.push((
                parse_url(&format!("{protocol}://localhost:{}", &captures["port"]))?,
                parse_url(&format!(
                    "{protocol}://{PUBLISHED_HOST}:{}",
                    published.host_port
                ))?,
            ));
        }

        for mount in &self.mounts {
            listing.push((
                parse_url(&directory_url(&mount.destination))?,
                parse_url(&directory_url(&mount.source))?,
            ));
        }

        Ok(listing)
    }
}

fn directory_url(path: &str) -> String {
    format!("file:///{}/", path.trim_matches('/'))
}

fn parse_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|err| Error::Runtime {
        command: "inspect".to_string(),
        message: format!("invalid resource uri `{raw}`: {err}"),
    })
}

#[async_trait]
impl RuntimeGateway for DockerGateway {
    async fn create_service(
        &self,
        spec: &ServiceSpec,
        cancel: &CancellationToken,
    ) -> Result<ServiceId> {
        let stdout = self.docker(&run_args(spec), cancel).await?;
        let stdout = String::from_utf8_lossy(&stdout);
        let service_id = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .ok_or_else(|| Error::Runtime {
                command: format!("{} run {}", self.binary, spec.image),
                message: "no container id was printed".to_string(),
            })?;
        Ok(service_id.to_string())
    }

    async fn remove_service(&self, service_id: &str, cancel: &CancellationToken) -> Result<()> {
        match self
            .docker(&args(["rm", "--force", "--volumes", service_id]), cancel)
            .await
        {
            Err(Error::Runtime { message, .. }) if message.contains("No such container") => {
                debug!(service_id, "container already removed");
                Ok(())
            }
            result => result.map(|_| ()),
        }
    }

    async fn health_status(
        &self,
        service_id: &str,
        cancel: &CancellationToken,
    ) -> Result<HealthStatus> {
        Ok(self.inspect(service_id, cancel).await?.health_status())
    }

    async fn available_resources(
        &self,
        service_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResourceListing>> {
        self.inspect(service_id, cancel).await?.resources()
    }

    async fn add_file(
        &self,
        service_id: &str,
        host_path: &Path,
        destination: &str,
        owner: Option<&str>,
        permissions: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let copy = vec![
            "cp".to_string(),
            host_path.display().to_string(),
            format!("{service_id}:{destination}"),
        ];
        self.docker(&copy, cancel).await?;

        if let Some(owner) = owner.filter(|owner| !owner.is_empty()) {
            self.exec(service_id, &["chown", owner, destination], cancel)
                .await?;
        }
        if let Some(permissions) = permissions.filter(|permissions| !permissions.is_empty()) {
            self.exec(service_id, &["chmod", permissions, destination], cancel)
                .await?;
        }
        Ok(())
    }

    async fn remove_file(
        &self,
        service_id: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.exec(service_id, &["rm", "-f", path], cancel).await?;
        Ok(())
    }

    async fn read_file(
        &self,
        service_id: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        self.exec(service_id, &["cat", path], cancel).await
    }

    async fn list_directory(
        &self,
        service_id: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let stdout = self.exec(service_id, &["ls", "-1", "-p", path], cancel).await?;
        Ok(String::from_utf8_lossy(&stdout)
            .lines()
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<NetworkId> {
        let mut create = args(["network", "create"]);
        for (key, value) in labels {
            create.push("--label".to_string());
            create.push(format!("{key}={value}"));
        }
        create.push(name.to_string());

        let stdout = self.docker(&create, cancel).await?;
        Ok(String::from_utf8_lossy(&stdout).trim().to_string())
    }

    async fn remove_network(&self, network_id: &str, cancel: &CancellationToken) -> Result<()> {
        self.docker(&args(["network", "rm", network_id]), cancel)
            .await?;
        Ok(())
    }

    async fn connect_network(
        &self,
        network_id: &str,
        service_id: &str,
        alias: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.docker(
            &args(["network", "connect", "--alias", alias, network_id, service_id]),
            cancel,
        )
        .await?;
        Ok(())
    }
}
