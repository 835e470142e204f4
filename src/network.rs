use crate::directives::NetworkSpec;
use crate::error::{Error, Result};
use crate::gateway::RuntimeGateway;
use crate::types::{Directive, NetworkId, ServiceState};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Owns the lifecycle of one named, run-scoped network.
#[derive(Debug)]
pub struct NetworkService {
    gateway: Arc<dyn RuntimeGateway>,
    name: Option<String>,
    network_id: Option<NetworkId>,
    teardown_on_dispose: bool,
    state: ServiceState,
}

impl NetworkService {
    pub fn new(gateway: Arc<dyn RuntimeGateway>) -> Self {
        Self {
            gateway,
            name: None,
            network_id: None,
            teardown_on_dispose: false,
            state: ServiceState::Uninitialized,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The runtime's network identifier, set once creation succeeded.
    pub fn service_id(&self) -> Option<&str> {
        self.network_id.as_deref()
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub async fn initialize(
        &mut self,
        directives: &[Directive],
        cancel: &CancellationToken,
    ) -> Result<()> {
        if self.state != ServiceState::Uninitialized {
            return Err(Error::InvalidOperation(format!(
                "network {:?} was already initialized",
                self.name
            )));
        }

        let spec = NetworkSpec::resolve(directives)?;
        self.state = ServiceState::Initializing;
        self.teardown_on_dispose = spec.run.teardown_on_complete;
        self.name = Some(spec.name.clone());

        match self
            .gateway
            .create_network(&spec.name, &spec.labels, cancel)
            .await
        {
            Ok(network_id) => {
                info!(network = %spec.name, %network_id, run_id = %spec.run.id, "network created");
                self.network_id = Some(network_id);
                self.state = ServiceState::Ready;
                Ok(())
            }
            Err(err) => {
                self.state = ServiceState::Failed;
                Err(err)
            }
        }
    }

    /// Connects `service_id` to this network under `alias`.
    pub async fn connect(
        &self,
        service_id: &str,
        alias: &str,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let network_id = self.network_id.as_deref().ok_or_else(|| {
            Error::InvalidOperation(format!(
                "network {:?} has not been created, cannot connect `{alias}`",
                self.name
            ))
        })?;

        self.gateway
            .connect_network(network_id, service_id, alias, cancel)
            .await?;
        debug!(network_id, service_id, alias, "service connected");
        Ok(())
    }

    /// Removes the network when the run tears down on completion. The
    /// network stays undisposed when removal fails.
    pub async fn dispose(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.state == ServiceState::Disposed {
            return Ok(());
        }

        match (&self.network_id, self.teardown_on_dispose) {
            (Some(network_id), true) => {
                self.gateway.remove_network(network_id, cancel).await?;
                info!(%network_id, "network removed");
            }
            (Some(network_id), false) => debug!(%network_id, "network kept after run"),
            (None, _) => {}
        }
        self.state = ServiceState::Disposed;
        Ok(())
    }
}
