use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, warn};

use wikidef::generator::GenerationOutcome;
use wikidef::{init_logging, run_serve, run_watch, App, SettingsOverrides};

#[derive(Parser)]
#[command(name = "wikidef", version, about = "Fills new wiki-link notes with definitions")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct VaultArgs {
    /// Vault folder
    vault: PathBuf,

    /// Chat-completion API key
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Chat-completion base URL, e.g. https://api.openai.com/v1
    #[arg(long)]
    api_base_url: Option<String>,
}

impl VaultArgs {
    fn open(self) -> Result<App> {
        App::open(
            &self.vault,
            SettingsOverrides {
                api_key: self.api_key,
                api_base_url: self.api_base_url,
            },
        )
    }
}

#[derive(Subcommand)]
enum Command {
    /// Watch the vault and fill new notes as they appear
    Watch(VaultArgs),
    /// Watch the vault and accept editor events over HTTP
    Serve {
        #[command(flatten)]
        vault: VaultArgs,
        #[arg(long, default_value_t = 3917)]
        port: u16,
    },
    /// Send a tiny prompt through every request shape and log the answer
    Test(VaultArgs),
    /// Add reference definitions and backlink excerpts to a note
    Define {
        #[command(flatten)]
        vault: VaultArgs,
        /// Vault-relative note path
        note: String,
    },
    /// Regenerate the definition in a note
    Regenerate {
        #[command(flatten)]
        vault: VaultArgs,
        /// Vault-relative note path
        note: String,
        /// Fuzzy query naming the origin note
        #[arg(long)]
        origin: Option<String>,
    },
}

fn report(outcome: GenerationOutcome) {
    match outcome {
        GenerationOutcome::Generated => info!("Definition written"),
        GenerationOutcome::FallbackWritten => warn!("Generation failed; fallback template written"),
        other => warn!("Nothing written: {:?}", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();

    match cli.command {
        Command::Watch(vault) => run_watch(vault.open()?).await,
        Command::Serve { vault, port } => run_serve(vault.open()?, port).await,
        Command::Test(vault) => {
            let app = vault.open()?;
            if app.commands.test_round_trip().await.is_none() {
                anyhow::bail!("completion endpoint gave no result");
            }
            Ok(())
        }
        Command::Define { vault, note } => {
            let app = vault.open()?;
            app.activate(&note).await?;
            let report = app.commands.define_current().await?;
            info!(
                "Defined {} (source: {}, {} backlink excerpt(s))",
                report.note,
                report
                    .source
                    .map_or_else(|| "none".to_string(), |s| s.to_string()),
                report.contexts
            );
            Ok(())
        }
        Command::Regenerate {
            vault,
            note,
            origin,
        } => {
            let app = vault.open()?;
            app.activate(&note).await?;
            let query = origin.ok_or_else(|| {
                anyhow::anyhow!("no origin is tracked outside watch mode; pass --origin <query>")
            })?;
            report(app.commands.regenerate_from(&query).await?);
            Ok(())
        }
    }
}
