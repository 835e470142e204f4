use crate::docker::DockerGateway;
use crate::error::{Error, Result};
use crate::gateway::RuntimeGateway;
use crate::health::DEFAULT_HEALTH_TIMEOUT;
use crate::network::NetworkService;
use crate::service::ContainerService;
use crate::settings::Settings;
use crate::types::{Directive, RunContext, ServiceState};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// A named service and the directives it was declared with.
#[derive(Clone, Debug)]
pub struct ServiceDeclaration {
    pub name: String,
    pub directives: Vec<Directive>,
}

/// Description of every network and service of one run.
#[derive(Clone, Debug)]
pub struct EnvironmentDefinition {
    pub run: RunContext,
    pub health_timeout: Duration,
    pub networks: Vec<Vec<Directive>>,
    pub services: Vec<ServiceDeclaration>,
}

impl EnvironmentDefinition {
    pub fn new(run: RunContext) -> Self {
        Self {
            run,
            health_timeout: DEFAULT_HEALTH_TIMEOUT,
            networks: vec![],
            services: vec![],
        }
    }

    pub fn with_health_timeout(mut self, health_timeout: Duration) -> Self {
        self.health_timeout = health_timeout;
        self
    }

    /// Declares a network labelled with this definition's run.
    pub fn network(mut self, name: impl Into<String>) -> Self {
        let directives = vec![Directive::network(name), Directive::Run(self.run.clone())];
        self.networks.push(directives);
        self
    }

    /// Declares a service; the run directive is appended to `directives`.
    pub fn service(mut self, name: impl Into<String>, mut directives: Vec<Directive>) -> Self {
        directives.push(Directive::Run(self.run.clone()));
        self.add_service(name, directives);
        self
    }

    /// Adds a network declaration exactly as given.
    pub fn add_network(&mut self, directives: Vec<Directive>) {
        self.networks.push(directives)
    }

    /// Adds a service declaration exactly as given.
    pub fn add_service(&mut self, name: impl Into<String>, directives: Vec<Directive>) {
        self.services.push(ServiceDeclaration {
            name: name.into(),
            directives,
        })
    }
}

/// Names declared by more than one network, in order of their second appearance.
fn duplicate_network_names(declarations: &[Vec<Directive>]) -> Vec<String> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut duplicates = vec![];
    let names = declarations.iter().flatten().filter_map(|directive| match directive {
        Directive::Network(name) => Some(name.as_str()),
        _ => None,
    });
    for name in names {
        let count = counts.entry(name).or_default();
        *count += 1;
        if *count == 2 {
            duplicates.push(name.to_string());
        }
    }
    duplicates
}

/// Owns every network and service of one run.
///
/// Networks are initialized before services and disposed after them. The
/// registries are filled once at construction and only iterated afterwards,
/// so a failed initialization still disposes everything already created.
#[derive(Debug)]
pub struct Environment {
    run: RunContext,
    network_declarations: Vec<Vec<Directive>>,
    networks: Vec<NetworkService>,
    services: Vec<ServiceSlot>,
    state: ServiceState,
}

#[derive(Debug)]
struct ServiceSlot {
    directives: Vec<Directive>,
    service: ContainerService,
}

impl Environment {
    pub fn new(gateway: Arc<dyn RuntimeGateway>, definition: EnvironmentDefinition) -> Self {
        let networks = definition
            .networks
            .iter()
            .map(|_| NetworkService::new(Arc::clone(&gateway)))
            .collect();
        let services = definition
            .services
            .into_iter()
            .map(|declaration| ServiceSlot {
                service: ContainerService::new(declaration.name, Arc::clone(&gateway))
                    .with_health_timeout(definition.health_timeout),
                directives: declaration.directives,
            })
            .collect();

        Self {
            run: definition.run,
            network_declarations: definition.networks,
            networks,
            services,
            state: ServiceState::Uninitialized,
        }
    }

    /// Wires the default docker CLI gateway from `settings`.
    pub fn docker(settings: &Settings, definition: EnvironmentDefinition) -> Self {
        Self::new(Arc::new(DockerGateway::from_settings(settings)), definition)
    }

    pub fn run(&self) -> &RunContext {
        &self.run
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn service(&self, name: &str) -> Option<&ContainerService> {
        self.services
            .iter()
            .map(|slot| &slot.service)
            .find(|service| service.name() == name)
    }

    pub fn services(&self) -> impl Iterator<Item = &ContainerService> {
        self.services.iter().map(|slot| &slot.service)
    }

    pub fn network(&self, name: &str) -> Option<&NetworkService> {
        self.networks
            .iter()
            .find(|network| network.name() == Some(name))
    }

    pub fn networks(&self) -> impl Iterator<Item = &NetworkService> {
        self.networks.iter()
    }

    /// Initializes all networks concurrently, then all services concurrently.
    ///
    /// On failure everything already created is disposed before the first
    /// initialization error is returned. That cleanup does not observe
    /// `cancel`, so a cancelled initialization still removes what it created;
    /// cleanup failures come back as [`Error::Initialization`].
    pub async fn initialize(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.state != ServiceState::Uninitialized {
            return Err(Error::InvalidOperation(format!(
                "environment for run `{}` was already initialized",
                self.run.id
            )));
        }

        let duplicates = duplicate_network_names(&self.network_declarations);
        if !duplicates.is_empty() {
            return Err(Error::DuplicateNetworkDefinition { names: duplicates });
        }

        self.state = ServiceState::Initializing;
        info!(run_id = %self.run.id, networks = self.networks.len(), services = self.services.len(), "initializing environment");

        let results = join_all(
            self.networks
                .iter_mut()
                .zip(self.network_declarations.iter())
                .map(|(network, directives)| network.initialize(directives, cancel)),
        )
        .await;
        if let Some(err) = self.first_failure(results).await {
            return Err(err);
        }

        let networks = &self.networks;
        let results = join_all(
            self.services
                .iter_mut()
                .map(|ServiceSlot { directives, service }| {
                    service.initialize(directives, networks, cancel)
                }),
        )
        .await;
        if let Some(err) = self.first_failure(results).await {
            return Err(err);
        }

        self.state = ServiceState::Ready;
        info!(run_id = %self.run.id, "environment ready");
        Ok(())
    }

    /// Disposes all services concurrently, then all networks concurrently.
    ///
    /// Every member of both phases is attempted; failures are collected into
    /// [`Error::Disposal`].
    pub async fn dispose(&mut self, cancel: &CancellationToken) -> Result<()> {
        let failures = self.teardown(cancel).await;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Disposal(failures))
        }
    }

    async fn teardown(&mut self, cancel: &CancellationToken) -> Vec<Error> {
        self.state = ServiceState::Disposed;

        let mut failures: Vec<Error> = join_all(
            self.services
                .iter_mut()
                .map(|slot| slot.service.dispose(cancel)),
        )
        .await
        .into_iter()
        .filter_map(Result::err)
        .collect();

        failures.extend(
            join_all(self.networks.iter_mut().map(|network| network.dispose(cancel)))
                .await
                .into_iter()
                .filter_map(Result::err),
        );

        for failure in &failures {
            warn!(run_id = %self.run.id, error = %failure, "disposal failed");
        }
        info!(run_id = %self.run.id, failures = failures.len(), "environment disposed");
        failures
    }

    async fn first_failure(&mut self, results: Vec<Result<()>>) -> Option<Error> {
        let mut errors = results.into_iter().filter_map(Result::err);
        let first = errors.next()?;
        for other in errors {
            warn!(run_id = %self.run.id, error = %other, "additional initialization failure");
        }

        let disposal = self.teardown(&CancellationToken::new()).await;
        self.state = ServiceState::Failed;
        if disposal.is_empty() {
            Some(first)
        } else {
            Some(Error::Initialization {
                source: Box::new(first),
                disposal,
            })
        }
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if matches!(self.state, ServiceState::Ready | ServiceState::Initializing) {
            warn!(run_id = %self.run.id, "environment dropped without being disposed");
        }
    }
}
