use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use voicepack::{Catalog, ManagerConfig, SelectionRegistry, VoiceInstaller, VoiceState};

/// Voicepack - voice asset manager for the speech assistant
#[derive(Parser)]
#[command(name = "voicepack", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List known voices and their install state
    List,
    /// Download and install a voice
    Install {
        /// Voice id (see `list`)
        id: String,
    },
    /// Remove an installed voice
    Uninstall {
        /// Voice id
        id: String,
    },
    /// Make an installed voice the active one
    Select {
        /// Voice id
        id: String,
    },
    /// Show the active voice and data directory
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn,voicepack=info",
        1 => "info,voicepack=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = ManagerConfig::load();
    let data_dir = config.data_dir.clone();
    let installer = Arc::new(VoiceInstaller::new(config.clone(), Catalog::builtin())?);
    let registry = SelectionRegistry::new(&config);
    registry.load(&installer).await;

    match cli.command {
        Command::List => cmd_list(&installer, &registry).await,
        Command::Install { id } => cmd_install(&installer, &id).await,
        Command::Uninstall { id } => {
            installer.uninstall(&id).await?;
            println!("uninstalled {id}");
            Ok(())
        }
        Command::Select { id } => {
            if registry.select(&id, &installer).await {
                println!("active voice: {id}");
                Ok(())
            } else {
                anyhow::bail!("{id} is not installed; run `voicepack install {id}` first")
            }
        }
        Command::Status => {
            match registry.current() {
                Some(id) => println!("active voice: {id}"),
                None => println!("active voice: (none)"),
            }
            println!("data dir: {}", data_dir.display());
            Ok(())
        }
    }
}

async fn cmd_list(installer: &Arc<VoiceInstaller>, registry: &SelectionRegistry) -> anyhow::Result<()> {
    let active = registry.current();
    for voice in installer.catalog().all() {
        let state = match installer.state(&voice.id).await {
            VoiceState::Installed => "installed".to_string(),
            VoiceState::NotInstalled => "not installed".to_string(),
            VoiceState::Installing { progress } => {
                format!("installing ({:.0}%)", f64::from(progress) * 100.0)
            }
            VoiceState::Failed { reason } => format!("failed: {reason}"),
        };
        let marker = if active.as_deref() == Some(voice.id.as_str()) { "*" } else { " " };
        println!(
            "{marker} {:<24} {:<28} {:<8} {:<6} {}",
            voice.id, voice.display_name, voice.locale, voice.quality, state
        );
    }
    Ok(())
}

async fn cmd_install(installer: &Arc<VoiceInstaller>, id: &str) -> anyhow::Result<()> {
    if installer.is_installed(id).await {
        println!("{id} is already installed");
        return Ok(());
    }

    let mut events = installer.request_install(id).await?;
    let mut last_percent: i32 = -1;

    loop {
        match events.recv().await {
            Ok(event) if event.voice_id == id => match event.state {
                VoiceState::Installing { progress } => {
                    #[allow(clippy::cast_possible_truncation)]
                    let percent = (f64::from(progress) * 100.0) as i32;
                    if percent > last_percent {
                        last_percent = percent;
                        print!("\rdownloading {id}: {percent:>3}%");
                        use std::io::Write as _;
                        let _ = std::io::stdout().flush();
                    }
                }
                VoiceState::Installed => {
                    println!("\ninstalled {id}");
                    if let Some(paths) = installer.resolve_paths(id).await {
                        println!("  model:  {}", paths.model.display());
                        println!("  tokens: {}", paths.tokens.display());
                    }
                    return Ok(());
                }
                VoiceState::Failed { reason } => {
                    println!();
                    anyhow::bail!("install of {id} failed: {reason}")
                }
                VoiceState::NotInstalled => {
                    println!("\ninstall of {id} was cancelled");
                    return Ok(());
                }
            },
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                anyhow::bail!("installer event stream closed unexpectedly")
            }
        }
    }
}
