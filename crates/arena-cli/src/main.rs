//! `arena`: run blind comparison rounds from a terminal.

mod cli;
mod render;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, bail};
use arena_client::init_observability;
use arena_client::prelude::*;
use clap::Parser as _;
use tracing::warn;

use crate::cli::{Cli, Command, GenerateArgs, parse_slot_answer};

fn load_env() {
    let _ = dotenvy::from_path(Path::new(
        format!("{}/.env", env!("CARGO_MANIFEST_DIR")).as_str(),
    ));
    dotenvy::dotenv().ok();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_observability();
    let cli = Cli::parse();

    let mut config = ArenaClientConfig::from_env().context("invalid ARENA_* configuration")?;
    if let Some(url) = cli.api_url {
        config = config.base_url(url);
    }
    if let Some(cookie) = cli.cookie {
        config = config.session_cookie(cookie);
    }
    let controller = Arc::new(GenerationController::from_config(config)?);

    match cli.command {
        Command::Experiments => {
            let options = controller.list_experiments().await?;
            print!("{}", render::format_experiments(&options));
            Ok(())
        }
        Command::Generate(args) => run_round(controller, args).await,
    }
}

/// Picks the first experiment matching the round's mode when none was given.
async fn select_default_experiment(
    controller: &GenerationController,
    request: &GenerationRequest,
) -> anyhow::Result<()> {
    if request.experiment_id.is_some() {
        return Ok(());
    }
    match controller.list_experiments().await {
        Ok(options) => {
            let chosen = options.into_iter().find(|o| o.mode == request.mode());
            controller.set_experiment(chosen.map(|o| o.value))?;
        }
        Err(e) => warn!(error = %e, "experiment catalogue unavailable; using backend default"),
    }
    Ok(())
}

async fn run_round(controller: Arc<GenerationController>, args: GenerateArgs) -> anyhow::Result<()> {
    let request = args.request()?;
    select_default_experiment(&controller, &request).await?;

    let interrupt = {
        let controller = controller.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                controller.cancel();
            }
        })
    };

    if args.no_stream {
        if let Err(e) = controller.generate(request).await
            && !e.is_cancelled()
        {
            warn!(error = %e, "single-shot generation failed");
        }
    } else {
        let handle = controller.start_stream(request)?;
        let progress = tokio::spawn(render::watch_progress(controller.subscribe()));
        handle.wait().await;
        progress.abort();
        eprintln!();
    }
    interrupt.abort();

    let snapshot = controller.snapshot();
    print!("{}", render::format_round(&snapshot));
    match snapshot.state {
        SessionState::Complete => {}
        SessionState::Cancelled => {
            eprintln!("round cancelled");
            return Ok(());
        }
        SessionState::Error => bail!(
            "generation failed: {}",
            snapshot.last_error.unwrap_or_default()
        ),
        other => bail!("round ended in unexpected state {other:?}"),
    }

    let selection = match args.prefer {
        Some(slot) => Some(ModelSlot::from(slot)),
        None if args.ask => ask_preference().await?,
        None => return Ok(()),
    };
    match controller.submit_preference(selection).await? {
        SubmitOutcome::Submitted => {
            println!("preference recorded");
            if let Some(assignment) = snapshot.assignment {
                println!("{}", render::format_reveal(assignment));
            }
        }
        SubmitOutcome::Refused(reason) => println!("preference not recorded: {reason}"),
    }
    Ok(())
}

async fn ask_preference() -> anyhow::Result<Option<ModelSlot>> {
    eprint!("prefer model A or B? (enter to skip) ");
    let answer = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await
    .context("stdin reader stopped")?
    .context("failed to read answer")?;
    Ok(parse_slot_answer(&answer))
}
