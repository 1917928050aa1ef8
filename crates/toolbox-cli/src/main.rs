mod cli;
mod repl;
mod scripts;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use toolbox_core::config::ConfigError;
use toolbox_core::{Orchestrator, ScriptCatalog, ToolboxConfig};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = cli::Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let message = format!("{e:#}");
            tracing::error!(error = %message, "toolbox failed");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "toolbox=debug,toolbox_core=debug"
    } else {
        "toolbox=info,toolbox_core=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(fmt::layer())
        .init();
}

async fn run(cli: cli::Cli) -> anyhow::Result<()> {
    let catalog = scripts::catalog()?;
    if cli.list_scripts {
        for name in catalog.names() {
            println!("{name}");
        }
        return Ok(());
    }

    let console = cli.repl;
    let config = cli.into_config()?;
    execute(config, &catalog, console).await
}

async fn execute(
    config: ToolboxConfig,
    catalog: &ScriptCatalog,
    console: bool,
) -> anyhow::Result<()> {
    let connection = config.connection.ok_or(ConfigError::MissingConnection)?;
    let channel = connection.into_channel()?;

    let mut builder = Orchestrator::builder(channel).script_configs(config.script_config);
    if let Some(path) = &config.vsf {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read specification {}", path.display()))?;
        builder = builder.specification(Arc::new(bytes));
    }
    for name in &config.scripts {
        builder = builder.load_from(catalog, name)?;
    }

    let orchestrator = builder.build();
    tracing::info!(
        run_id = %orchestrator.run_id(),
        scripts = ?orchestrator.script_names(),
        "starting"
    );
    let console = console.then(|| {
        tokio::spawn(repl::run(
            repl::stdin_lines(),
            std::io::stdout(),
            orchestrator.services(),
        ))
    });

    let result = orchestrator.run().await;
    if let Some(console) = console {
        if result.is_ok() {
            tracing::info!("scripts finished, console stays open until `quit`");
            console.await??;
        } else {
            console.abort();
        }
    }
    result?;
    Ok(())
}
