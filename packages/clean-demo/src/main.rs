//! Demo binary
//!
//! Wires a profile use case to simulated external interfaces and drives it
//! from the command line.

mod profile;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clean::{
    attach_gateway, attach_watcher, Config, ExternalInterface, FailureInput, Providers,
    ResponseSender, UseCase,
};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use profile::{
    presence_handler, FetchProfileOutput, PresenceGateway, PresenceInput, PresenceRequest,
    PresenceResponse, ProfileDirectory, ProfileEntity, ProfileGateway, ProfileHandler,
    ProfileInput, ProfileRequest, ProfileResponse, ProfileViewOutput, WatchPresenceOutput,
};

const HANDLER_LATENCY: Duration = Duration::from_millis(50);
const PRESENCE_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "clean-demo")]
#[command(about = "Drive a use case against simulated external interfaces")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a profile; repeated clicks inside the debounce window collapse
    Fetch {
        id: String,
        #[arg(long, default_value_t = 3)]
        clicks: u32,
    },

    /// Fetch a profile, then follow its presence heartbeats
    Watch {
        id: String,
        #[arg(long, default_value_t = 4)]
        ticks: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env before the filter reads RUST_LOG
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,clean=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("Failed to load configuration")?;
    info!(
        debounce_ms = config.debounce_duration.as_millis() as u64,
        watcher_timeout = ?config.watcher_timeout,
        "configuration loaded"
    );

    let providers = Providers::new();
    providers.register(config)?;
    providers.register_lazy(|_: &Providers| ProfileDirectory::seeded())?;
    providers.register(build_interface(&providers)?)?;

    let result = match cli.command {
        Commands::Fetch { id, clicks } => run_fetch(&providers, id, clicks).await,
        Commands::Watch { id, ticks } => run_watch(&providers, id, ticks).await,
    };

    providers.get::<Arc<ExternalInterface>>()?.dispose();
    result
}

fn build_interface(providers: &Providers) -> Result<Arc<ExternalInterface>> {
    let config = providers.get::<Config>()?;
    let directory = providers.get::<ProfileDirectory>()?;

    let interface = ExternalInterface::builder()
        .with_config((*config).clone())
        .on(ProfileHandler {
            directory,
            latency: HANDLER_LATENCY,
        })?
        .on_fn(
            |request: PresenceRequest, responses: ResponseSender<PresenceResponse>| {
                presence_handler(request, responses, PRESENCE_INTERVAL)
            },
        )?
        .build();

    Ok(interface)
}

fn profile_use_case(providers: &Providers, id: String) -> Result<UseCase<ProfileEntity>> {
    let config = providers.get::<Config>()?;

    let use_case = UseCase::builder(ProfileEntity::new(id))
        .with_config((*config).clone())
        .with_output_filter(|e: &ProfileEntity| FetchProfileOutput { id: e.id.clone() })?
        .with_output_filter(|e: &ProfileEntity| WatchPresenceOutput { id: e.id.clone() })?
        .with_output_filter(ProfileViewOutput::from_entity)?
        .with_input_filter(|input: PresenceInput, e: &ProfileEntity| e.with_heartbeat(input))?
        .with_input_filter(|failure: FailureInput, e: &ProfileEntity| e.with_error(failure))?
        .build();

    let interface = providers.get::<Arc<ExternalInterface>>()?;
    attach_gateway(
        &use_case,
        ProfileGateway,
        interface.transport::<ProfileRequest, ProfileResponse>()?,
    )?;

    Ok(use_case)
}

async fn fetch_profile(use_case: &UseCase<ProfileEntity>) -> Result<()> {
    let output = use_case.get_output::<FetchProfileOutput>()?;
    use_case
        .request(
            output,
            |e: &ProfileEntity, input: ProfileInput| e.with_name(input),
            |e: &ProfileEntity, failure| e.with_error(failure),
        )
        .await?;
    Ok(())
}

async fn run_fetch(providers: &Providers, id: String, clicks: u32) -> Result<()> {
    let use_case = profile_use_case(providers, id)?;

    // Clicks go through the debouncer; only those that survive reach the gateway.
    let (tx, mut rx) = mpsc::unbounded_channel();
    for click in 0..clicks {
        let tx = tx.clone();
        use_case.debounce_default(
            move || {
                let _ = tx.send(click);
            },
            "fetch-profile",
        );
    }
    drop(tx);

    let mut fetches = 0;
    while let Some(click) = rx.recv().await {
        info!(click, "fetching profile");
        fetch_profile(&use_case).await?;
        fetches += 1;
    }

    let view = use_case.get_output::<ProfileViewOutput>()?;
    info!(clicks, fetches, headline = %view.headline, "fetch finished");

    use_case.dispose();
    Ok(())
}

async fn run_watch(providers: &Providers, id: String, ticks: u32) -> Result<()> {
    let use_case = profile_use_case(providers, id)?;
    let interface = providers.get::<Arc<ExternalInterface>>()?;
    attach_watcher(
        &use_case,
        PresenceGateway { ticks },
        interface.transport::<PresenceRequest, PresenceResponse>()?,
    )?;

    let mut views = Box::pin(use_case.watch_output::<ProfileViewOutput>()?);
    let renderer = tokio::spawn(async move {
        while let Some(view) = views.next().await {
            info!(headline = %view.headline, "render");
        }
    });

    fetch_profile(&use_case).await?;

    let output = use_case.get_output::<WatchPresenceOutput>()?;
    use_case
        .request(
            output,
            |e: &ProfileEntity, input: PresenceInput| e.with_heartbeat(input),
            |e: &ProfileEntity, failure| e.with_error(failure),
        )
        .await?;

    let mut entities = use_case.watch_entity();
    let wait_for_heartbeats = async {
        loop {
            let seen = entities.borrow_and_update().heartbeats;
            if seen >= ticks {
                return Ok::<_, anyhow::Error>(());
            }
            entities.changed().await?;
        }
    };

    let deadline = PRESENCE_INTERVAL * (ticks + 2);
    match tokio::time::timeout(deadline, wait_for_heartbeats).await {
        Ok(waited) => waited?,
        Err(_) => warn!(ticks, "presence stream ended early"),
    }

    let entity = use_case.entity();
    info!(
        heartbeats = entity.heartbeats,
        last_seen = ?entity.last_seen,
        "watch finished"
    );

    interface.cancel_all();
    use_case.dispose();
    renderer.abort();
    Ok(())
}
