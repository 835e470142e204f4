#![warn(clippy::unwrap_used)]
//! Run-scoped container fixtures for integration tests.
//!
//! An [`Environment`] provisions every declared network and service for one
//! test run, waits for services to report healthy, discovers their
//! endpoints and tears everything down again.

pub mod directives;
pub mod docker;
pub mod environment;
pub mod error;
pub mod gateway;
pub mod health;
pub mod network;
pub mod resources;
pub mod service;
pub mod settings;
#[cfg(any(test, feature = "testkit"))]
pub mod testkit;
pub mod transfer;
pub mod types;
pub mod utils;

pub use docker::DockerGateway;
pub use environment::{Environment, EnvironmentDefinition, ServiceDeclaration};
pub use error::{Error, Result};
pub use gateway::RuntimeGateway;
pub use network::NetworkService;
pub use resources::{DirectoryAdapter, FileAdapter, ResourceAdapter};
pub use service::ContainerService;
pub use settings::Settings;
pub use tokio_util::sync::CancellationToken;
pub use types::{
    Directive, HealthCheckSpec, HealthStatus, Image, NetworkAttachment, PullPolicy, RunContext,
    ServiceResource, ServiceState, RUN_ID_LABEL,
};
