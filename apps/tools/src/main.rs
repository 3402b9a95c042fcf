use std::fmt::Write as _;

use anyhow::Result;
use bot_api::TransformCatalog;
use clap::{Parser, Subcommand};
use shared::domain::UserId;
use storage::{Storage, StoredSession};

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/bot.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every stored session.
    Sessions {
        #[arg(long)]
        json: bool,
    },
    /// Clear busy flags left behind by a crashed bot. Stop the bot first:
    /// a running bot writes its in-memory sessions back over this change.
    ClearBusy,
    /// Forget one user's session state. Stop the bot first: a running bot
    /// writes its in-memory sessions back over this change.
    ResetSession { user_id: i64 },
    /// Print the built-in transform catalog.
    Catalog {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Sessions { json } => {
            let storage = Storage::new(&cli.database_url).await?;
            let sessions = storage.load_sessions().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            } else {
                print!("{}", format_sessions(&sessions));
            }
        }
        Command::ClearBusy => {
            let storage = Storage::new(&cli.database_url).await?;
            let cleared = storage.clear_busy_flags().await?;
            println!("cleared busy flag on {cleared} session(s)");
        }
        Command::ResetSession { user_id } => {
            let storage = Storage::new(&cli.database_url).await?;
            if storage.reset_session(UserId(user_id)).await? {
                println!("reset session for user_id={user_id}");
            } else {
                println!("no session stored for user_id={user_id}");
            }
        }
        Command::Catalog { json } => {
            let catalog = TransformCatalog::builtin()?;
            if json {
                println!("{}", serde_json::to_string_pretty(catalog.rows())?);
            } else {
                print!("{}", format_catalog(&catalog));
            }
        }
    }

    Ok(())
}

fn format_sessions(sessions: &[StoredSession]) -> String {
    if sessions.is_empty() {
        return "no sessions\n".to_string();
    }
    let mut out = String::new();
    for session in sessions {
        let elapsed = session
            .last_elapsed_secs
            .map(|secs| format!("{secs:.1}s"))
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "user_id={} busy={} last_elapsed={} last_command={} updated_at={}",
            session.user_id,
            session.busy,
            elapsed,
            session.last_command.as_deref().unwrap_or("-"),
            session.updated_at.to_rfc3339(),
        );
    }
    out
}

fn format_catalog(catalog: &TransformCatalog) -> String {
    let mut out = String::new();
    for (row_idx, row) in catalog.rows().iter().enumerate() {
        for entry in row {
            let _ = writeln!(
                out,
                "{row_idx}\t{}\t{}\t{}",
                entry.label, entry.layer, entry.unit
            );
        }
    }
    out
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
