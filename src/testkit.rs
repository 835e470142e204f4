//! In-memory gateway that records every call, for tests.

use crate::directives::ServiceSpec;
use crate::error::{Error, Result};
use crate::gateway::{ResourceListing, RuntimeGateway};
use crate::types::{HealthStatus, NetworkId, ServiceId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// One observed gateway call, in the order it completed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    CreateService { service_id: ServiceId, image: String },
    RemoveService(ServiceId),
    CreateNetwork { network_id: NetworkId, name: String },
    RemoveNetwork(NetworkId),
    ConnectNetwork {
        network_id: NetworkId,
        service_id: ServiceId,
        alias: String,
    },
    AddFile {
        service_id: ServiceId,
        destination: String,
    },
    RemoveFile {
        service_id: ServiceId,
        path: String,
    },
}

/// An upload as observed while the staged host file still existed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Upload {
    pub service_id: ServiceId,
    pub host_path: PathBuf,
    pub destination: String,
    pub owner: Option<String>,
    pub permissions: Option<String>,
    pub contents: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    next_id: usize,
    calls: Vec<Call>,
    specs: Vec<(ServiceId, ServiceSpec)>,
    network_labels: HashMap<NetworkId, BTreeMap<String, String>>,
    health: HashMap<String, VecDeque<HealthStatus>>,
    polls: HashMap<String, usize>,
    resources: HashMap<String, Vec<ResourceListing>>,
    files: HashMap<(ServiceId, String), Vec<u8>>,
    uploads: Vec<Upload>,
    staged_paths: Vec<PathBuf>,
    failing: HashSet<String>,
}

#[derive(Debug, Default)]
pub struct FakeGateway {
    state: Mutex<State>,
    latency: Option<Duration>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every create/remove call, so concurrent phases overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Health statuses reported for a service id or image, one per poll. The
    /// last status repeats once the script is exhausted. Services without a
    /// script report `Running`.
    pub fn script_health(&self, key: &str, statuses: impl IntoIterator<Item = HealthStatus>) {
        self.state
            .lock()
            .health
            .insert(key.to_string(), statuses.into_iter().collect());
    }

    /// Resource listing reported for a service id or image.
    pub fn script_resources(&self, key: &str, listing: Vec<ResourceListing>) {
        self.state.lock().resources.insert(key.to_string(), listing);
    }

    /// Makes any call keyed by this image, service id, network name or alias fail.
    pub fn fail_on(&self, key: &str) {
        self.state.lock().failing.insert(key.to_string());
    }

    /// Lets calls keyed by `key` succeed again after [`Self::fail_on`].
    pub fn recover(&self, key: &str) {
        self.state.lock().failing.remove(key);
    }

    pub fn seed_file(&self, service_id: &str, path: &str, contents: &[u8]) {
        self.state
            .lock()
            .files
            .insert((service_id.to_string(), path.to_string()), contents.to_vec());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().calls.clone()
    }

    pub fn created_specs(&self) -> Vec<(ServiceId, ServiceSpec)> {
        self.state.lock().specs.clone()
    }

    pub fn network_labels(&self, network_id: &str) -> Option<BTreeMap<String, String>> {
        self.state.lock().network_labels.get(network_id).cloned()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.state.lock().uploads.clone()
    }

    /// Host paths of every upload attempt, including failed ones.
    pub fn staged_paths(&self) -> Vec<PathBuf> {
        self.state.lock().staged_paths.clone()
    }

    pub fn file(&self, service_id: &str, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .files
            .get(&(service_id.to_string(), path.to_string()))
            .cloned()
    }

    pub fn health_polls(&self, key: &str) -> usize {
        self.state.lock().polls.get(key).copied().unwrap_or_default()
    }

    pub fn removed_services(&self) -> Vec<ServiceId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::RemoveService(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn removed_networks(&self) -> Vec<NetworkId> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::RemoveNetwork(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn connections(&self) -> Vec<(NetworkId, ServiceId, String)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::ConnectNetwork {
                    network_id,
                    service_id,
                    alias,
                } => Some((network_id, service_id, alias)),
                _ => None,
            })
            .collect()
    }

    fn image_of(state: &State, service_id: &str) -> Option<String> {
        state
            .specs
            .iter()
            .find(|(id, _)| id == service_id)
            .map(|(_, spec)| spec.image.clone())
    }

    fn check(state: &State, keys: &[&str], command: &str) -> Result<()> {
        match keys.iter().find(|key| state.failing.contains(**key)) {
            Some(key) => Err(Error::Runtime {
                command: command.to_string(),
                message: format!("injected failure for `{key}`"),
            }),
            None => Ok(()),
        }
    }

    async fn pause(&self, cancel: &CancellationToken) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled("fake gateway call".to_string())),
                _ = tokio::time::sleep(latency) => {}
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RuntimeGateway for FakeGateway {
    async fn create_service(
        &self,
        spec: &ServiceSpec,
        cancel: &CancellationToken,
    ) -> Result<ServiceId> {
        self.pause(cancel).await?;
        let mut state = self.state.lock();
        Self::check(&state, &[spec.image.as_str()], "create service")?;
        state.next_id += 1;
        let service_id = format!("service-{}", state.next_id);
        state.specs.push((service_id.clone(), spec.clone()));
        state.calls.push(Call::CreateService {
            service_id: service_id.clone(),
            image: spec.image.clone(),
        });
        Ok(service_id)
    }

    async fn remove_service(&self, service_id: &str, cancel: &CancellationToken) -> Result<()> {
        self.pause(cancel).await?;
        let mut state = self.state.lock();
        Self::check(&state, &[service_id], "remove service")?;
        state.calls.push(Call::RemoveService(service_id.to_string()));
        Ok(())
    }

    async fn health_status(
        &self,
        service_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<HealthStatus> {
        let mut state = self.state.lock();
        *state.polls.entry(service_id.to_string()).or_default() += 1;

        let key = if state.health.contains_key(service_id) {
            Some(service_id.to_string())
        } else {
            Self::image_of(&state, service_id)
        };
        let script = match key {
            Some(key) => state.health.get_mut(&key),
            None => None,
        };
        let Some(script) = script else {
            return Ok(HealthStatus::Running);
        };
        let status = if script.len() > 1 {
            script.pop_front().unwrap_or_default()
        } else {
            script.front().copied().unwrap_or_default()
        };
        Ok(status)
    }

    async fn available_resources(
        &self,
        service_id: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<ResourceListing>> {
        let state = self.state.lock();
        Self::check(&state, &[service_id], "list resources")?;
        let listing = state.resources.get(service_id).cloned().or_else(|| {
            Self::image_of(&state, service_id).and_then(|image| state.resources.get(&image).cloned())
        });
        Ok(listing.unwrap_or_default())
    }

    async fn add_file(
        &self,
        service_id: &str,
        host_path: &Path,
        destination: &str,
        owner: Option<&str>,
        permissions: Option<&str>,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let contents = tokio::fs::read(host_path).await?;
        let mut state = self.state.lock();
        state.staged_paths.push(host_path.to_path_buf());
        Self::check(&state, &[service_id, destination], "add file")?;
        state.uploads.push(Upload {
            service_id: service_id.to_string(),
            host_path: host_path.to_path_buf(),
            destination: destination.to_string(),
            owner: owner.map(str::to_string),
            permissions: permissions.map(str::to_string),
            contents: contents.clone(),
        });
        state
            .files
            .insert((service_id.to_string(), destination.to_string()), contents);
        state.calls.push(Call::AddFile {
            service_id: service_id.to_string(),
            destination: destination.to_string(),
        });
        Ok(())
    }

    async fn remove_file(
        &self,
        service_id: &str,
        path: &str,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let mut state = self.state.lock();
        state.files.remove(&(service_id.to_string(), path.to_string()));
        state.calls.push(Call::RemoveFile {
            service_id: service_id.to_string(),
            path: path.to_string(),
        });
        Ok(())
    }

    async fn read_file(
        &self,
        service_id: &str,
        path: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<u8>> {
        self.state
            .lock()
            .files
            .get(&(service_id.to_string(), path.to_string()))
            .cloned()
            .ok_or_else(|| Error::Runtime {
                command: format!("read {path}"),
                message: "no such file".to_string(),
            })
    }

    async fn list_directory(
        &self,
        service_id: &str,
        path: &str,
        _cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let state = self.state.lock();
        let mut entries: Vec<String> = state
            .files
            .keys()
            .filter(|(id, _)| id == service_id)
            .filter_map(|(_, file)| file.strip_prefix(path))
            .map(|rest| match rest.split_once('/') {
                Some((dir, _)) => format!("{dir}/"),
                None => rest.to_string(),
            })
            .collect();
        entries.sort();
        entries.dedup();
        Ok(entries)
    }

    async fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<NetworkId> {
        self.pause(cancel).await?;
        let mut state = self.state.lock();
        Self::check(&state, &[name], "create network")?;
        state.next_id += 1;
        let network_id = format!("network-{}", state.next_id);
        state.network_labels.insert(network_id.clone(), labels.clone());
        state.calls.push(Call::CreateNetwork {
            network_id: network_id.clone(),
            name: name.to_string(),
        });
        Ok(network_id)
    }

    async fn remove_network(&self, network_id: &str, cancel: &CancellationToken) -> Result<()> {
        self.pause(cancel).await?;
        let mut state = self.state.lock();
        Self::check(&state, &[network_id], "remove network")?;
        state.calls.push(Call::RemoveNetwork(network_id.to_string()));
        Ok(())
    }

    async fn connect_network(
        &self,
        network_id: &str,
        service_id: &str,
        alias: &str,
        _cancel: &CancellationToken,
    ) -> Result<()> {
        let mut state = self.state.lock();
        Self::check(&state, &[alias], "connect network")?;
        state.calls.push(Call::ConnectNetwork {
            network_id: network_id.to_string(),
            service_id: service_id.to_string(),
            alias: alias.to_string(),
        });
        Ok(())
    }
}
