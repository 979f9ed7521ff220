//! inbox-sync - watch and manage a realtime notification inbox from the terminal.

mod output;

use anyhow::Context;
use clap::{Parser, Subcommand};
use inbox_config_and_utils::{init_logging_for_service, Config, Paths};
use inbox_data_api::{AuthContext, SupabaseNotificationsApi};
use inbox_realtime::{ChannelRegistry, SupabaseRealtimeTransport};
use inbox_sync_engine::{realtime_options, AlwaysOnline, NotificationInbox};
use output::OutputFormat;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// inbox-sync - Keep a notification inbox in sync with Supabase.
#[derive(Parser)]
#[command(name = "inbox-sync")]
#[command(about = "Realtime notification inbox client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Supabase access token of the signed-in user
    #[arg(long, env = "INBOX_ACCESS_TOKEN", hide_env_values = true, global = true)]
    access_token: Option<String>,

    /// Owner of the inbox
    #[arg(long, env = "INBOX_USER_ID", global = true)]
    user_id: Option<String>,

    /// Directory holding config.json and logs (defaults to ~/.inbox-sync)
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text", global = true)]
    format: OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the inbox
    List {
        /// Extra pages to load after the first one
        #[arg(short, long, default_value = "0")]
        pages: usize,
    },
    /// Print the inbox on every change until interrupted
    Watch,
    /// Mark one notification as read
    Read {
        /// Notification ID
        id: String,
    },
    /// Mark every notification as read
    ReadAll,
    /// Delete a notification
    Delete {
        /// Notification ID
        id: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging_for_service("inbox-cli", &cli.log_level);

    if let Err(e) = run(&cli).await {
        output::print_error(&format!("{:#}", e), &cli.format);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    let paths = match &cli.base_dir {
        Some(dir) => Paths::with_base_dir(dir.clone()),
        None => Paths::new()?,
    };
    let config = Config::load(&paths).context("failed to load config")?;
    debug!(config_file = %paths.config_file().display(), "Config loaded");

    let user_id = cli
        .user_id
        .clone()
        .context("no user id (pass --user-id or set INBOX_USER_ID)")?;
    let access_token = cli
        .access_token
        .clone()
        .context("no access token (pass --access-token or set INBOX_ACCESS_TOKEN)")?;

    let api = Arc::new(SupabaseNotificationsApi::new(
        &config.supabase_url,
        &config.supabase_publishable_key,
        config.sync.request_timeout(),
    )?);
    api.set_context(AuthContext {
        access_token: access_token.clone(),
        user_id: user_id.clone(),
    })
    .await;

    let transport = Arc::new(SupabaseRealtimeTransport::new(
        &config.supabase_url()?,
        &config.supabase_publishable_key,
        config.sync.heartbeat_interval(),
    )?);
    let registry = Arc::new(ChannelRegistry::new(
        transport,
        realtime_options(&config.sync),
    ));
    let inbox = NotificationInbox::new(
        config.sync.clone(),
        api.clone(),
        registry,
        Arc::new(AlwaysOnline),
    );

    inbox.login(&user_id, &access_token).await?;
    info!(user_id = %user_id, "Inbox session started");

    let result = execute(&cli.command, &inbox, &cli.format).await;

    inbox.logout().await;
    api.clear_context().await;
    result
}

async fn execute(
    command: &Commands,
    inbox: &NotificationInbox,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    match command {
        Commands::List { pages } => {
            for _ in 0..*pages {
                if inbox.load_more().await? == 0 {
                    break;
                }
            }
            output::print_snapshot(&inbox.snapshot(), format);
        }
        Commands::Watch => watch(inbox, format).await?,
        Commands::Read { id } => {
            inbox.mark_as_read(id).await?;
            output::print_success(&format!("Marked {} as read", id), format);
        }
        Commands::ReadAll => {
            inbox.mark_all_as_read().await?;
            output::print_success("Marked all notifications as read", format);
        }
        Commands::Delete { id } => {
            inbox.delete_notification(id).await?;
            output::print_success(&format!("Deleted {}", id), format);
        }
    }
    Ok(())
}

/// Print each published snapshot until Ctrl-C.
async fn watch(inbox: &NotificationInbox, format: &OutputFormat) -> anyhow::Result<()> {
    let mut snapshots = inbox.subscribe();
    let mut last_revision = None;

    loop {
        {
            let snapshot = snapshots.borrow_and_update().clone();
            // Loading flags toggle without a cache change; skip those.
            if last_revision != Some(snapshot.revision) && !snapshot.is_loading {
                last_revision = Some(snapshot.revision);
                output::print_snapshot(&snapshot, format);
            }
        }

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing inbox");
                return Ok(());
            }
            changed = snapshots.changed() => {
                changed.context("inbox closed")?;
            }
        }
    }
}
