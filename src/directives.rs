//! Resolution of directive sets into service and network specifications.
//!
//! Every check here runs before any runtime call is made.

use crate::error::{Error, Result};
use crate::types::{Directive, HealthCheckSpec, Image, NetworkAttachment, PullPolicy, RunContext};
use crate::utils::run_labels;
use std::collections::BTreeMap;

/// Everything needed to create one service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceSpec {
    pub image: String,
    pub pull_policy: PullPolicy,
    pub command: Vec<String>,
    pub health_check: Option<HealthCheckSpec>,
    pub labels: BTreeMap<String, String>,
    pub run: RunContext,
    pub attachments: Vec<NetworkAttachment>,
}

impl ServiceSpec {
    pub fn resolve(service: &str, directives: &[Directive]) -> Result<Self> {
        let images: Vec<&Image> = directives
            .iter()
            .filter_map(|directive| match directive {
                Directive::Image(image) => Some(image),
                _ => None,
            })
            .collect();

        let image = match images.as_slice() {
            [] => {
                return Err(Error::ImageNameMissing {
                    service: service.to_string(),
                })
            }
            [image] => *image,
            _ => {
                return Err(Error::MultipleImageNamesProvided {
                    service: service.to_string(),
                    images: images.iter().map(|image| image.name.clone()).collect(),
                })
            }
        };

        let run = single_run(&format!("service `{service}`"), directives)?;

        let command = at_most_one(
            &format!("service `{service}`"),
            "command",
            directives.iter().filter_map(|directive| match directive {
                Directive::Command(command) => Some(command.clone()),
                _ => None,
            }),
        )?
        .unwrap_or_default();

        let health_check = at_most_one(
            &format!("service `{service}`"),
            "health check",
            directives.iter().filter_map(|directive| match directive {
                Directive::HealthCheck(health_check) => Some(health_check.clone()),
                _ => None,
            }),
        )?;

        let attachments = directives
            .iter()
            .filter_map(|directive| match directive {
                Directive::NetworkAttachment(attachment) => Some(attachment.clone()),
                _ => None,
            })
            .collect();

        Ok(Self {
            image: image.name.clone(),
            pull_policy: image.pull_policy,
            command,
            health_check,
            labels: run_labels(&run),
            run,
            attachments,
        })
    }

    /// True when the runtime health check is disabled and readiness polling is skipped.
    pub fn skips_health_check(&self) -> bool {
        self.health_check
            .as_ref()
            .map(|health_check| health_check.disabled)
            .unwrap_or(false)
    }
}

/// Everything needed to create one network.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkSpec {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub run: RunContext,
}

impl NetworkSpec {
    pub fn resolve(directives: &[Directive]) -> Result<Self> {
        let names: Vec<&String> = directives
            .iter()
            .filter_map(|directive| match directive {
                Directive::Network(name) => Some(name),
                _ => None,
            })
            .collect();

        let name = match names.as_slice() {
            [name] => *name,
            [] => {
                return Err(Error::InvalidOperation(
                    "a network requires exactly one network directive, none were provided"
                        .to_string(),
                ))
            }
            _ => {
                return Err(Error::InvalidOperation(format!(
                    "a network requires exactly one network directive, {} were provided",
                    names.len()
                )))
            }
        };

        let run = single_run(&format!("network `{name}`"), directives)?;

        if name.trim().is_empty() {
            return Err(Error::InvalidArgument(
                "network name cannot be blank".to_string(),
            ));
        }

        Ok(Self {
            name: name.clone(),
            labels: run_labels(&run),
            run,
        })
    }
}

fn single_run(owner: &str, directives: &[Directive]) -> Result<RunContext> {
    let runs: Vec<&RunContext> = directives
        .iter()
        .filter_map(|directive| match directive {
            Directive::Run(run) => Some(run),
            _ => None,
        })
        .collect();

    match runs.as_slice() {
        [run] => Ok((*run).clone()),
        _ => Err(Error::InvalidOperation(format!(
            "{owner} requires exactly one run directive, {} were provided",
            runs.len()
        ))),
    }
}

fn at_most_one<T>(owner: &str, what: &str, mut values: impl Iterator<Item = T>) -> Result<Option<T>> {
    let first = values.next();
    if values.next().is_some() {
        return Err(Error::InvalidOperation(format!(
            "{owner} declares more than one {what}"
        )));
    }
    Ok(first)
}
