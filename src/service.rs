use crate::directives::ServiceSpec;
use crate::error::{Error, Result};
use crate::gateway::RuntimeGateway;
use crate::health::{ensure_healthy, HealthCheckOutcome, DEFAULT_HEALTH_TIMEOUT};
use crate::network::NetworkService;
use crate::resources::{adapters, discover, ResourceAdapter};
use crate::transfer::{stage_bytes, stage_reader, upload};
use crate::types::{Directive, NetworkAttachment, ServiceId, ServiceResource, ServiceState};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Owns the lifecycle of one container-backed service.
#[derive(Debug)]
pub struct ContainerService {
    name: String,
    gateway: Arc<dyn RuntimeGateway>,
    health_timeout: Duration,
    service_id: Option<ServiceId>,
    resources: Vec<ServiceResource>,
    adapters: Vec<ResourceAdapter>,
    teardown_on_dispose: bool,
    state: ServiceState,
}

impl ContainerService {
    pub fn new(name: impl Into<String>, gateway: Arc<dyn RuntimeGateway>) -> Self {
        Self {
            name: name.into(),
            gateway,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            service_id: None,
            resources: Vec::new(),
            adapters: Vec::new(),
            teardown_on_dispose: false,
            state: ServiceState::Uninitialized,
        }
    }

    /// Overrides how long initialization waits for the service to become ready.
    pub fn with_health_timeout(mut self, health_timeout: Duration) -> Self {
        self.health_timeout = health_timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The runtime identifier, recorded as soon as creation succeeds.
    pub fn service_id(&self) -> Option<&str> {
        self.service_id.as_deref()
    }

    pub fn resources(&self) -> &[ServiceResource] {
        &self.resources
    }

    pub fn adapters(&self) -> &[ResourceAdapter] {
        &self.adapters
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    /// Creates the service, waits for it to become ready, discovers its
    /// resources and attaches it to every declared network, in that order.
    ///
    /// `networks` are the already-initialized networks of the environment that
    /// attachment directives may name.
    pub async fn initialize(
        &mut self,
        directives: &[Directive],
        networks: &[NetworkService],
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.state != ServiceState::Uninitialized {
            return Err(Error::InvalidOperation(format!(
                "service `{}` was already initialized",
                self.name
            )));
        }

        let spec = ServiceSpec::resolve(&self.name, directives)?;
        let attachments = self.resolve_attachments(&spec.attachments, networks)?;

        self.state = ServiceState::Initializing;
        self.teardown_on_dispose = spec.run.teardown_on_complete;

        match self.provision(&spec, &attachments, cancel).await {
            Ok(()) => {
                self.state = ServiceState::Ready;
                info!(service = %self.name, service_id = ?self.service_id, "service ready");
                Ok(())
            }
            Err(err) => {
                self.state = ServiceState::Failed;
                warn!(service = %self.name, service_id = ?self.service_id, error = %err, "service failed to initialize");
                Err(err)
            }
        }
    }

    fn resolve_attachments<'a>(
        &self,
        attachments: &'a [NetworkAttachment],
        networks: &'a [NetworkService],
    ) -> Result<Vec<(&'a NetworkService, &'a str)>> {
        attachments
            .iter()
            .map(|attachment| {
                networks
                    .iter()
                    .find(|network| network.name() == Some(attachment.network.as_str()))
                    .map(|network| (network, attachment.alias.as_str()))
                    .ok_or_else(|| Error::UnknownNetwork {
                        service: self.name.clone(),
                        network: attachment.network.clone(),
                    })
            })
            .collect()
    }

    async fn provision(
        &mut self,
        spec: &ServiceSpec,
        attachments: &[(&NetworkService, &str)],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let service_id = self.gateway.create_service(spec, cancel).await?;
        info!(service = %self.name, %service_id, image = %spec.image, "service created");
        self.service_id = Some(service_id.clone());

        if spec.skips_health_check() {
            debug!(service = %self.name, "health check disabled, presuming ready");
        } else {
            match ensure_healthy(
                self.gateway.as_ref(),
                &service_id,
                self.health_timeout,
                cancel,
            )
            .await?
            {
                HealthCheckOutcome::Healthy(_) => {}
                HealthCheckOutcome::Timeout { last_status } => {
                    return Err(Error::HealthCheckTimeout {
                        service: self.name.clone(),
                        last_status,
                    })
                }
                HealthCheckOutcome::Cancelled { last_status } => {
                    return Err(Error::Cancelled(format!(
                        "waiting for service `{}` to become healthy (last status: {last_status})",
                        self.name
                    )))
                }
            }
        }

        self.refresh_resources(cancel).await?;

        for (network, alias) in attachments {
            network.connect(&service_id, alias, cancel).await?;
        }
        Ok(())
    }

    /// Re-runs discovery, replacing the resource and adapter lists wholesale.
    pub async fn refresh_resources(&mut self, cancel: &CancellationToken) -> Result<()> {
        let service_id = self.require_id()?.to_string();
        let listing = self
            .gateway
            .available_resources(&service_id, cancel)
            .await?;
        let resources = discover(listing);
        let bound = adapters(&self.gateway, &service_id, &resources);
        debug!(service = %self.name, count = resources.len(), "resources discovered");

        self.resources = resources;
        self.adapters = bound;
        Ok(())
    }

    /// Removes the backing container when the run tears down on completion.
    /// Only this service's id is ever removed. A failed removal leaves the
    /// service undisposed so it can be retried.
    pub async fn dispose(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.state == ServiceState::Disposed {
            return Ok(());
        }

        match (&self.service_id, self.teardown_on_dispose) {
            (Some(service_id), true) => {
                self.gateway.remove_service(service_id, cancel).await?;
                info!(service = %self.name, %service_id, "service removed");
            }
            (Some(service_id), false) => {
                debug!(service = %self.name, %service_id, "service kept after run")
            }
            (None, _) => {}
        }
        self.state = ServiceState::Disposed;
        Ok(())
    }

    pub async fn add_file(
        &self,
        host_path: &Path,
        destination: &str,
        owner: &str,
        permissions: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.gateway
            .add_file(
                self.require_id()?,
                host_path,
                destination,
                Some(owner),
                Some(permissions),
                cancel,
            )
            .await
    }

    pub async fn remove_file(&self, path: &str, cancel: &CancellationToken) -> Result<()> {
        self.gateway
            .remove_file(self.require_id()?, path, cancel)
            .await
    }

    /// Uploads `contents` through a transient host file that is gone once this returns.
    pub async fn create_file(
        &self,
        contents: impl AsRef<[u8]>,
        destination: &str,
        owner: &str,
        permissions: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let service_id = self.require_id()?;
        let staged = stage_bytes(contents.as_ref())?;
        upload(
            self.gateway.as_ref(),
            service_id,
            staged,
            destination,
            Some(owner),
            Some(permissions),
            cancel,
        )
        .await
    }

    /// Streams `reader` into a transient host file, then uploads it like [`Self::create_file`].
    pub async fn create_file_from_reader<R>(
        &self,
        reader: &mut R,
        destination: &str,
        owner: &str,
        permissions: &str,
        cancel: &CancellationToken,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let service_id = self.require_id()?;
        let staged = stage_reader(reader).await?;
        upload(
            self.gateway.as_ref(),
            service_id,
            staged,
            destination,
            Some(owner),
            Some(permissions),
            cancel,
        )
        .await
    }

    fn require_id(&self) -> Result<&str> {
        self.service_id.as_deref().ok_or_else(|| {
            Error::InvalidOperation(format!("service `{}` has not been created", self.name))
        })
    }
}
