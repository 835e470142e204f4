use crate::directives::ServiceSpec;
use crate::error::Result;
use crate::types::{HealthStatus, NetworkId, ServiceId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::Debug;
use std::path::Path;
use tokio_util::sync::CancellationToken;
use url::Url;

/// A `(guest, host)` pair as listed by the runtime for a running service.
pub type ResourceListing = (Url, Url);

/// Translates lifecycle operations into container-runtime calls.
///
/// Implementations are invoked concurrently for different ids and hold no
/// per-service state of their own.
#[async_trait]
pub trait RuntimeGateway: Debug + Send + Sync {
    /// Creates and starts the backing resource for `spec`, returning its id.
    async fn create_service(&self, spec: &ServiceSpec, cancel: &CancellationToken)
        -> Result<ServiceId>;

    /// Removes a service. Removing a service that no longer exists is not an error.
    async fn remove_service(&self, service_id: &str, cancel: &CancellationToken) -> Result<()>;

    async fn health_status(
        &self,
        service_id: &str,
        cancel: &CancellationToken,
    ) -> Result<HealthStatus>;

    async fn available_resources(
        &self,
        service_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<ResourceListing>>;

    /// Copies `host_path` into the service at `destination`.
    async fn add_file(
        &self,
        service_id: &str,
        host_path: &Path,
        destination: &str,
        owner: Option<&str>,
        permissions: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn remove_file(
        &self,
        service_id: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;

    async fn read_file(
        &self,
        service_id: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>>;

    /// Lists the entries of a directory; subdirectories carry a trailing `/`.
    async fn list_directory(
        &self,
        service_id: &str,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>>;

    async fn create_network(
        &self,
        name: &str,
        labels: &BTreeMap<String, String>,
        cancel: &CancellationToken,
    ) -> Result<NetworkId>;

    async fn remove_network(&self, network_id: &str, cancel: &CancellationToken) -> Result<()>;

    /// Connects a service to a network. Repeated calls are forwarded, not deduplicated.
    async fn connect_network(
        &self,
        network_id: &str,
        service_id: &str,
        alias: &str,
        cancel: &CancellationToken,
    ) -> Result<()>;
}
