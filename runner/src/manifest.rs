use anyhow::{bail, Context};
use mittons_fixtures::{
    Directive, EnvironmentDefinition, HealthCheckSpec, Image, PullPolicy, RunContext,
};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

/// Fixtures declared in a YAML file.
///
/// ```yaml
/// networks: [backend]
/// services:
///   - name: db
///     image: postgres:16
///     command: postgres -c fsync=off
///     health_check:
///       command: pg_isready -U postgres
///       interval_ms: 500
///     networks:
///       backend: db
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub networks: Vec<String>,
    #[serde(default)]
    pub services: Vec<ServiceManifest>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceManifest {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub pull: PullPolicy,
    pub command: Option<CommandLine>,
    pub health_check: Option<HealthCheckManifest>,
    /// Network name to alias.
    #[serde(default)]
    pub networks: BTreeMap<String, String>,
}

/// A command as one whitespace-separated string, or as an exact argument
/// list when arguments contain spaces.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum CommandLine {
    Line(String),
    Args(Vec<String>),
}

impl From<CommandLine> for Directive {
    fn from(command: CommandLine) -> Self {
        match command {
            CommandLine::Line(line) => Directive::command(&line),
            CommandLine::Args(args) => Directive::Command(args),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HealthCheckManifest {
    #[serde(default)]
    pub disabled: bool,
    pub command: Option<String>,
    pub interval_ms: Option<u64>,
    pub timeout_ms: Option<u64>,
    pub start_period_ms: Option<u64>,
    pub retries: Option<u32>,
}

impl From<HealthCheckManifest> for HealthCheckSpec {
    fn from(manifest: HealthCheckManifest) -> Self {
        HealthCheckSpec {
            disabled: manifest.disabled,
            command: manifest.command,
            interval: manifest.interval_ms.map(Duration::from_millis),
            timeout: manifest.timeout_ms.map(Duration::from_millis),
            start_period: manifest.start_period_ms.map(Duration::from_millis),
            retries: manifest.retries,
        }
    }
}

impl Manifest {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read manifest {}", path.display()))?;
        Self::from_yaml(&raw).with_context(|| format!("invalid manifest {}", path.display()))
    }

    pub fn from_yaml(raw: &str) -> anyhow::Result<Self> {
        let manifest: Manifest = serde_yaml::from_str(raw)?;

        let mut names = HashSet::new();
        for service in &manifest.services {
            if !names.insert(service.name.as_str()) {
                bail!("service `{}` is declared more than once", service.name);
            }
        }
        Ok(manifest)
    }

    /// Turns the manifest into directive sets for `run`. Duplicate network
    /// names are left for the environment to reject.
    pub fn into_definition(self, run: RunContext, health_timeout: Duration) -> EnvironmentDefinition {
        let mut definition = EnvironmentDefinition::new(run).with_health_timeout(health_timeout);

        for network in self.networks {
            definition = definition.network(network);
        }

        for service in self.services {
            let mut directives = vec![Directive::Image(
                Image::new(service.image).with_pull_policy(service.pull),
            )];
            if let Some(command) = service.command {
                directives.push(command.into());
            }
            if let Some(health_check) = service.health_check {
                directives.push(Directive::HealthCheck(health_check.into()));
            }
            directives.extend(
                service
                    .networks
                    .into_iter()
                    .map(|(network, alias)| Directive::attach(network, alias)),
            );
            definition = definition.service(service.name, directives);
        }

        definition
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
networks: [backend]
services:
  - name: db
    image: postgres:16
    pull: always
    command: postgres -c fsync=off
    health_check:
      command: pg_isready -U postgres
      interval_ms: 1500
      retries: 3
    networks:
      backend: db
  - name: cache
    image: redis:7
    health_check:
      disabled: true
"#;

    #[test]
    fn manifest_becomes_directive_sets() {
        let run = RunContext::new("run-7", true);
        let definition = Manifest::from_yaml(MANIFEST)
            .expect("valid manifest")
            .into_definition(run.clone(), Duration::from_secs(9));

        assert_eq!(definition.health_timeout, Duration::from_secs(9));
        assert_eq!(
            definition.networks,
            vec![vec![Directive::network("backend"), Directive::Run(run.clone())]]
        );

        let db = &definition.services[0];
        assert_eq!(db.name, "db");
        assert_eq!(
            db.directives,
            vec![
                Directive::Image(Image::new("postgres:16").with_pull_policy(PullPolicy::Always)),
                Directive::command("postgres -c fsync=off"),
                Directive::HealthCheck(HealthCheckSpec {
                    command: Some("pg_isready -U postgres".to_string()),
                    interval: Some(Duration::from_millis(1500)),
                    retries: Some(3),
                    ..Default::default()
                }),
                Directive::attach("backend", "db"),
                Directive::Run(run.clone()),
            ]
        );

        let cache = &definition.services[1];
        assert_eq!(
            cache.directives,
            vec![
                Directive::image("redis:7"),
                Directive::HealthCheck(HealthCheckSpec::disabled()),
                Directive::Run(run),
            ]
        );
    }

    #[test]
    fn command_lists_keep_arguments_with_spaces() {
        let raw = r#"
services:
  - name: worker
    image: alpine:3
    command: [sh, -c, "sleep 1 && echo ok"]
"#;
        let definition = Manifest::from_yaml(raw)
            .expect("valid manifest")
            .into_definition(RunContext::new("run-7", true), Duration::from_secs(5));

        assert_eq!(
            definition.services[0].directives[1],
            Directive::Command(vec![
                "sh".to_string(),
                "-c".to_string(),
                "sleep 1 && echo ok".to_string(),
            ])
        );
    }

    #[test]
    fn empty_manifest_is_valid() {
        let manifest = Manifest::from_yaml("{}").expect("valid manifest");
        assert!(manifest.networks.is_empty());
        assert!(manifest.services.is_empty());
    }

    #[test]
    fn duplicate_service_names_are_rejected() {
        let raw = r#"
services:
  - name: db
    image: postgres:16
  - name: db
    image: postgres:15
"#;
        let err = Manifest::from_yaml(raw).expect_err("duplicate names");
        assert!(err.to_string().contains("`db`"));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let raw = r#"
services:
  - name: db
    image: postgres:16
    ports: [5432]
"#;
        assert!(Manifest::from_yaml(raw).is_err());
    }
}
