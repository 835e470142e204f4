#![warn(clippy::unwrap_used)]

mod manifest;

use anyhow::Context;
use clap::Parser;
use mittons_fixtures::settings::RUN_ID_VAR;
use mittons_fixtures::{CancellationToken, Environment, ServiceResource, Settings};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::process::Command;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::manifest::Manifest;

#[derive(Parser, Debug)]
#[command(name = "fixtures-runner")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the fixture manifest
    #[arg(short, long, default_value = "fixtures.yaml")]
    manifest: PathBuf,

    /// Command to run once every fixture is ready. Without one the fixtures
    /// stay up until interrupted.
    #[arg(last = true)]
    command: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Endpoints<'a> {
    service: &'a str,
    service_id: Option<&'a str>,
    resources: &'a [ServiceResource],
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    let definition = Manifest::load(&cli.manifest)?
        .into_definition(settings.run_context(), settings.health_timeout);
    let mut environment = Environment::docker(&settings, definition);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, tearing fixtures down");
                cancel.cancel();
            }
        }
    });

    let outcome = run(&mut environment, &settings, &cli.command, &cancel).await;
    // Teardown gets its own token so an interrupt still cleans up.
    let disposal = environment.dispose(&CancellationToken::new()).await;

    let code = outcome?;
    disposal.context("unable to tear fixtures down")?;
    Ok(code)
}

async fn run(
    environment: &mut Environment,
    settings: &Settings,
    command: &[String],
    cancel: &CancellationToken,
) -> anyhow::Result<ExitCode> {
    environment
        .initialize(cancel)
        .await
        .context("unable to provision fixtures")?;

    let endpoints: Vec<Endpoints> = environment
        .services()
        .map(|service| Endpoints {
            service: service.name(),
            service_id: service.service_id(),
            resources: service.resources(),
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&endpoints)?);

    let Some((program, args)) = command.split_first() else {
        info!(run_id = %settings.run_id, "fixtures ready, press Ctrl-C to tear down");
        cancel.cancelled().await;
        return Ok(ExitCode::SUCCESS);
    };

    info!(%program, run_id = %settings.run_id, "running command");
    let mut child = Command::new(program)
        .args(args)
        .env(RUN_ID_VAR, &settings.run_id)
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("unable to start `{program}`"))?;

    tokio::select! {
        _ = cancel.cancelled() => Ok(ExitCode::from(130)),
        status = child.wait() => {
            let status = status?;
            info!(%status, "command finished");
            Ok(match status.code() {
                Some(0) => ExitCode::SUCCESS,
                Some(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
                None => ExitCode::FAILURE,
            })
        }
    }
}
