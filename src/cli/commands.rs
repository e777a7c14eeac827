use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "kalakar")]
#[command(author, version, about = "Inspect and manage Kalakar conversation backups", long_about = None)]
pub struct Cli {
    /// Work from the local backups only, without contacting the remote store
    #[arg(long, global = true)]
    pub offline: bool,

    /// Act on behalf of this user instead of the configured one
    #[arg(short = 'u', long, global = true)]
    pub user: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List available conversation backups, newest first
    List,

    /// Show one conversation backup
    Show {
        conversation_id: String,

        /// Print the raw backup JSON
        #[arg(long)]
        json: bool,
    },

    /// Delete a conversation from local and remote storage
    Delete { conversation_id: String },

    /// Push every local backup to the remote store
    Sync,
}
