//! agent-registrar: register an agent's external URL on-chain, inspect its
//! wallet and agent card, or run a local chain emulator.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use agent_registrar::chain::{ChainClient, HttpChainClient};
use agent_registrar::config::RegistrationConfig;
use agent_registrar::emulator::{self, DEFAULT_CHAIN_ID, EmulatorConfig};
use agent_registrar::identity::AgentIdentity;
use agent_registrar::identity::agent_card::agent_card_json;
use agent_registrar::identity::custody::{ResolvedKey, resolve_key};
use agent_registrar::identity::wallet::address_hex;
use agent_registrar::registry::{RegistrationOutcome, RegistrationTrigger, lookup_registration};
use agent_registrar::settings::Settings;

#[derive(Parser)]
#[command(name = "agent-registrar", version)]
#[command(about = "On-chain agent endpoint registration")]
struct Cli {
    /// Settings file (default: ~/.agent-registrar/settings.json)
    #[arg(long, global = true, env = "AGENT_SETTINGS_PATH")]
    settings: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the local JSON-RPC chain emulator
    Emulator {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value_t = 8545)]
        port: u16,

        #[arg(long, default_value_t = DEFAULT_CHAIN_ID)]
        chain_id: u64,

        /// Never hand out receipts (exercise confirmation timeouts)
        #[arg(long)]
        withhold_receipts: bool,
    },

    /// Run one registration attempt and wait for its outcome
    Register {
        /// Sign but do not submit. Still needs the RPC endpoint and registry
        /// address: the registry lookup, nonce and gas queries run as usual.
        #[arg(long)]
        mock: bool,
    },

    /// Resolve (or create) the wallet and print its address
    Wallet,

    /// Print the ERC-8004 agent card as JSON
    Card,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("agent_registrar=info,tower_http=info"));
    let builder = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let settings = match &cli.settings {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    };

    match cli.command {
        Command::Emulator {
            host,
            port,
            chain_id,
            withhold_receipts,
        } => {
            let config = EmulatorConfig {
                host,
                port,
                chain_id,
                withhold_receipts,
                ..EmulatorConfig::default()
            };
            emulator::serve(config, async {
                let _ = tokio::signal::ctrl_c().await;
                info!("Shutting down");
            })
            .await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Register { mock } => {
            let mut config = RegistrationConfig::from_env(&settings)?;
            // Running the command is the opt-in.
            config.enable_registration = true;
            config.mock_registration |= mock;
            register(config).await
        }
        Command::Wallet => {
            let config = RegistrationConfig::from_env(&settings)?;
            let resolved = resolve(&config).await?;
            println!("{}", address_hex(&resolved.key.address()));
            eprintln!("source: {}", resolved.origin);
            Ok(ExitCode::SUCCESS)
        }
        Command::Card => {
            let config = RegistrationConfig::from_env(&settings)?;
            card(&config).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn register(config: RegistrationConfig) -> anyhow::Result<ExitCode> {
    let trigger = RegistrationTrigger::new();
    let Some(mut task) = trigger.schedule(config) else {
        anyhow::bail!("registration was not scheduled");
    };

    let finished = tokio::select! {
        outcome = task.wait() => Some(outcome),
        _ = tokio::signal::ctrl_c() => None,
    };
    let outcome = match finished {
        Some(outcome) => outcome,
        None => {
            task.abort();
            task.outcome().await
        }
    };

    println!("{outcome}");
    Ok(match outcome {
        RegistrationOutcome::Failed(_) => ExitCode::FAILURE,
        _ => ExitCode::SUCCESS,
    })
}

async fn resolve(config: &RegistrationConfig) -> anyhow::Result<ResolvedKey> {
    let custody = config.custody_config();
    let resolved = tokio::task::spawn_blocking(move || resolve_key(&custody))
        .await
        .context("key resolution task failed")??;
    Ok(resolved)
}

async fn card(config: &RegistrationConfig) -> anyhow::Result<()> {
    let resolved = resolve(config).await?;
    let mut identity = AgentIdentity::new(config.identity.agent_name.clone(), &resolved);
    let external_url = config.external_url.as_deref();

    // Only list the registry if it currently holds our URL.
    if let (Ok(rpc_url), Ok(registry), Some(url)) =
        (config.rpc_url(), config.registry_address(), external_url)
    {
        let client = HttpChainClient::with_timeout(rpc_url, config.rpc_timeout)?;
        let chain_id = client.get_chain_id().await?;
        let registered = lookup_registration(&client, registry, identity.wallet_address).await?;
        if registered.as_deref() == Some(url) {
            identity = identity.with_registration(chain_id, registry);
        }
    }

    println!("{}", agent_card_json(&config.identity, &identity, external_url)?);
    Ok(())
}
