use anyhow::{Context, Result};
use clap::Parser;
use kalakar::cli::{Cli, Commands};
use kalakar::core::backup;
use kalakar::{utils, Connectivity, ConversationPersistence, Settings};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let mut settings = Settings::new().context("Failed to load configuration")?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level)),
        )
        .init();

    let cli = Cli::parse();
    if let Some(user) = cli.user {
        settings.user.id = user;
    }

    let persistence = ConversationPersistence::from_settings(&settings).await?;
    if cli.offline {
        persistence.set_connectivity(Connectivity::Offline).await;
    }

    let result = match cli.command {
        Commands::List => handle_list(&persistence).await,
        Commands::Show {
            conversation_id,
            json,
        } => handle_show(&persistence, &conversation_id, json).await,
        Commands::Delete { conversation_id } => handle_delete(&persistence, &conversation_id).await,
        Commands::Sync => handle_sync(&persistence).await,
    };

    // Shutdown gracefully
    persistence.shutdown().await;

    result
}

async fn handle_list(persistence: &ConversationPersistence) -> Result<()> {
    let backups = persistence.load_available_backups().await?;
    utils::print_header(&format!("Backups for {}", persistence.user_id()));

    if backups.is_empty() {
        utils::print_info("No conversation backups found");
        return Ok(());
    }
    for backup in &backups {
        utils::print_backup_line(backup);
    }
    Ok(())
}

async fn handle_show(
    persistence: &ConversationPersistence,
    conversation_id: &str,
    json: bool,
) -> Result<()> {
    let Some(found) = persistence.load_conversation(conversation_id).await? else {
        anyhow::bail!("No backup found for conversation '{}'", conversation_id);
    };

    if json {
        println!("{}", backup::serialize(&found)?);
    } else {
        utils::print_backup_details(&found);
    }
    Ok(())
}

async fn handle_delete(persistence: &ConversationPersistence, conversation_id: &str) -> Result<()> {
    persistence.delete_conversation(conversation_id).await?;
    utils::print_success(&format!("Deleted conversation '{}'", conversation_id));

    let deferred = persistence.coordinator().pending_deletes().await;
    if deferred.iter().any(|id| id == conversation_id) {
        utils::print_warning(
            "Only the local copy was removed; run delete again while online to remove the synced copy",
        );
    }
    Ok(())
}

async fn handle_sync(persistence: &ConversationPersistence) -> Result<()> {
    if !persistence.coordinator().is_online() {
        anyhow::bail!("Cannot sync while --offline is set");
    }

    let report = persistence
        .coordinator()
        .push_local_backups(persistence.user_id())
        .await?;
    if report.is_empty() {
        utils::print_info("No local backups to sync");
        return Ok(());
    }

    for id in &report.synced {
        utils::print_success(&format!("Synced {}", id));
    }
    for id in &report.failed {
        utils::print_error(&format!("Could not sync {}", id));
    }
    if !report.failed.is_empty() {
        anyhow::bail!("{} backups could not be synced", report.failed.len());
    }
    Ok(())
}
