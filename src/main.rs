use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use ahrian_core::config::{dirs_home, AppConfig};
use ahrian_core::traits::ConversationStore;
use ahrian_core::types::{Conversation, ConversationId, GeneratedArtifact, StepStatus};
use ahrian_memory::SqliteConversationStore;

#[derive(Parser)]
#[command(name = "ahrian", version, about = "Inspect and export orchestrated conversations")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "ahrian.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored conversations, oldest first
    List,
    /// Show one conversation: plan, step results, answer, and sources
    Show {
        /// Conversation ID
        id: String,
    },
    /// Export a generated sheet as CSV
    Export {
        /// Conversation ID
        id: String,
        /// Export the sheet produced by this step instead of the latest one
        #[arg(long)]
        step: Option<u32>,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Delete a stored conversation
    Delete {
        /// Conversation ID
        id: String,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ahrian=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "ahrian", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    if let Commands::Config = &cli.command {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    let store = SqliteConversationStore::open(&config.store_path(), config.store.namespace.clone())?;

    match cli.command {
        Commands::List => {
            let conversations = store.load_all().await?;
            if conversations.is_empty() {
                println!("No stored conversations.");
            }
            for c in &conversations {
                println!(
                    "{}  {:<20}  {}  {}",
                    c.id,
                    c.status.as_str(),
                    c.created_at.format("%Y-%m-%d %H:%M"),
                    truncate(&c.prompt, 60)
                );
            }
        }
        Commands::Show { id } => {
            let conversation = find(&store, &id).await?;
            print_conversation(&conversation);
        }
        Commands::Export { id, step, output } => {
            let conversation = find(&store, &id).await?;
            let artifact = select_artifact(&conversation, step)?;
            let csv = artifact.to_csv();
            match output {
                Some(path) => {
                    std::fs::write(&path, csv)?;
                    info!(path = %path.display(), rows = artifact.row_count(), "Exported sheet");
                    println!("Wrote {} rows to {}", artifact.row_count(), path.display());
                }
                None => print!("{}", csv),
            }
        }
        Commands::Delete { id } => {
            if store.delete(&ConversationId::from_str(&id)).await? {
                println!("Deleted {}", id);
            } else {
                anyhow::bail!("Conversation not found: {}", id);
            }
        }
        Commands::Config | Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Load the explicit config file, else `~/.ahrian/config.toml`, else defaults.
fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    if path.exists() {
        return Ok(AppConfig::load(path)?);
    }
    if let Some(home_config) = dirs_home().map(|h| h.join(".ahrian").join("config.toml")) {
        if home_config.exists() {
            info!(path = %home_config.display(), "Loading config from home directory");
            return Ok(AppConfig::load(&home_config)?);
        }
    }
    Ok(AppConfig::default())
}

async fn find(store: &SqliteConversationStore, id: &str) -> anyhow::Result<Conversation> {
    Ok(store.require(&ConversationId::from_str(id)).await?)
}

fn select_artifact(conversation: &Conversation, step: Option<u32>) -> anyhow::Result<&GeneratedArtifact> {
    match step {
        Some(n) => conversation
            .result(n)
            .and_then(|r| r.artifact.as_ref())
            .ok_or_else(|| anyhow::anyhow!("Step {} produced no sheet", n)),
        None => conversation
            .generated_artifact
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Conversation {} produced no sheet", conversation.id)),
    }
}

fn print_conversation(c: &Conversation) {
    println!("Conversation {}", c.id);
    println!("  Prompt:  {}", c.prompt);
    println!("  Status:  {}", c.status);
    println!("  Created: {}", c.created_at.to_rfc3339());

    if let Some(ref clarification) = c.clarification {
        println!("\nClarification needed: {}", clarification.question);
        for option in &clarification.options {
            println!("  [{}] {}", option.key, option.value);
        }
    }

    if !c.results.is_empty() {
        println!("\nSteps:");
        for r in &c.results {
            let marker = match r.status {
                StepStatus::Pending => " ",
                StepStatus::Running => ">",
                StepStatus::Completed => "✓",
                StepStatus::Error => "✗",
            };
            println!("  {} {}. [{}] {}", marker, r.step, r.agent, r.task);
            if !r.result.is_empty() {
                for line in r.result.lines() {
                    println!("      {}", line);
                }
            }
            if let Some(ref artifact) = r.artifact {
                println!("      sheet: {} ({} rows)", artifact.name, artifact.row_count());
            }
        }
    }

    if let Some(answer) = c.final_answer() {
        println!("\nAnswer:\n{}", answer);
    }

    let sources = c.merged_sources();
    if !sources.is_empty() {
        println!("\nSources:");
        for s in &sources {
            println!("  - {} <{}> ({})", s.title, s.uri, s.agent);
        }
    }

    if let Some(ref message) = c.error_message {
        let code = c.error_code.map(|code| code.to_string()).unwrap_or_default();
        println!("\nError [{}]: {}", code, message);
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    let cut: String = s.chars().take(max).collect();
    format!("{}...", cut)
}
