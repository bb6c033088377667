//! CLI entry point for the onion room daemon.
//!
//! `run` serves the contact and conversation ports until interrupted. The
//! other commands work on the saved state while the daemon is stopped; any
//! messages they queue are delivered by the next `run`.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{error, info};
use onionroom::{
    transport::{SocksDialer, StaticProvisioner},
    utils::{ConfigError, DaemonConfig, DEFAULT_CONFIG_FILE},
    Daemon, Snapshot,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use uuid::Uuid;

/// Onion Room - serverless group rooms over onion rendezvous addresses
#[derive(Parser)]
#[command(name = "onionroomd")]
#[command(about = "Serverless multi-party rooms over onion rendezvous addresses")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = env!("CARGO_PKG_AUTHORS"))]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbose logging (can be used multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-error output)
    #[arg(short, long)]
    quiet: bool,

    /// Data directory holding the state file
    #[arg(short, long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run {
        /// Contact fingerprints to form a room with once the listeners are up
        #[arg(short, long, value_name = "FINGERPRINT", num_args = 1..)]
        invite: Vec<String>,
    },
    /// Manage contact identities
    Contact {
        #[command(subcommand)]
        action: ContactCommands,
    },
    /// Manage rooms
    Room {
        #[command(subcommand)]
        action: RoomCommands,
    },
    /// Generate and validate configuration files
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ContactCommands {
    /// Create a contact identity
    Create,
    /// List contact fingerprints
    List,
    /// Delete a contact identity
    Delete {
        /// Contact fingerprint
        fingerprint: String,
    },
}

#[derive(Subcommand)]
enum RoomCommands {
    /// Form a room with the given contact fingerprints
    Create {
        /// Contact fingerprints to invite
        contacts: Vec<String>,
    },
    /// Invite another contact into a room
    Add {
        /// Room id
        room: Uuid,
        /// Contact fingerprint
        contact: String,
    },
    /// Send a text message
    Send {
        /// Room id
        room: Uuid,
        /// Message text
        text: String,
    },
    /// Announce a file to a room
    Share {
        /// Room id
        room: Uuid,
        /// File to announce
        file: PathBuf,
        /// MIME type hint
        #[arg(short, long)]
        mime: Option<String>,
    },
    /// Rename a room
    Name {
        /// Room id
        room: Uuid,
        /// New name
        name: String,
    },
    /// Show the latest messages
    Messages {
        /// Room id
        room: Uuid,
        /// Number of messages, 0 for all
        #[arg(short = 'n', long, default_value = "20")]
        count: usize,
    },
    /// Show room details and queue depths
    Info {
        /// Room id
        room: Uuid,
    },
    /// List rooms
    List,
    /// Delete a room
    Delete {
        /// Room id
        room: Uuid,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Generate a default configuration file
    Generate {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Validate configuration file
    Validate {
        /// Configuration file to validate
        file: Option<PathBuf>,
    },
    /// Show current configuration
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref())?;

    setup_logging(cli.verbose, cli.quiet, &config.logging.level);

    if let Some(data_dir) = cli.data_dir {
        config.storage.state_file = data_dir.join("state.json");
        config.storage.data_dir = data_dir;
    }

    match cli.command {
        Commands::Run { invite } => handle_run_command(invite, config).await,
        Commands::Contact { action } => handle_contact_commands(action, config).await,
        Commands::Room { action } => handle_room_commands(action, config).await,
        Commands::Config { action } => handle_config_commands(action, &config),
    }
}

fn setup_logging(verbose: u8, quiet: bool, configured: &str) {
    let log_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => configured,
            1 => "debug",
            _ => "trace",
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_secs()
        .init();
}

fn open_daemon(config: DaemonConfig) -> Result<Daemon> {
    config.validate()?;
    config.ensure_directories()?;

    let address = config
        .network
        .rendezvous_address
        .clone()
        .ok_or_else(|| ConfigError::MissingField {
            field: "network.rendezvous_address".to_string(),
        })?;
    let snapshot = Snapshot::load(&config.storage.state_file)?;
    let dialer = SocksDialer::new(config.network.socks_proxy);

    Ok(Daemon::restore(
        config,
        Arc::new(StaticProvisioner::new(address)),
        Arc::new(dialer),
        snapshot,
    ))
}

async fn handle_run_command(invite: Vec<String>, config: DaemonConfig) -> Result<()> {
    let daemon = open_daemon(config)?;
    let network = &daemon.config().network;

    let contact_addr = format!("{}:{}", network.listen_host, network.contact_port);
    let conversation_addr = format!("{}:{}", network.listen_host, network.conversation_port);
    let contacts = TcpListener::bind(&contact_addr)
        .await
        .with_context(|| format!("binding contact port {contact_addr}"))?;
    let conversations = TcpListener::bind(&conversation_addr)
        .await
        .with_context(|| format!("binding conversation port {conversation_addr}"))?;

    info!("Starting onion room daemon...");
    info!("Contact port: {}", contact_addr);
    info!("Conversation port: {}", conversation_addr);

    if daemon.contacts().is_empty() {
        daemon.create_contact().await?;
    }
    for fingerprint in daemon.contacts() {
        info!("Contact fingerprint: {}", fingerprint);
    }

    let contact_task = tokio::spawn({
        let daemon = daemon.clone();
        async move { daemon.serve_contacts(contacts).await }
    });
    let conversation_task = tokio::spawn({
        let daemon = daemon.clone();
        async move { daemon.serve_conversations(conversations).await }
    });

    if !invite.is_empty() {
        match daemon.create_room(&invite).await {
            Ok(id) => info!("Room {} formed with {} contact(s)", id, invite.len()),
            Err(e) => error!("Room formation failed: {}", e),
        }
    }

    if let Err(e) = signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutting down gracefully...");

    daemon.shutdown();
    let _ = tokio::join!(contact_task, conversation_task);
    daemon.save_state()?;
    info!("State saved to {}", daemon.config().storage.state_file.display());

    Ok(())
}

async fn handle_contact_commands(action: ContactCommands, config: DaemonConfig) -> Result<()> {
    let daemon = open_daemon(config)?;

    match action {
        ContactCommands::Create => {
            let fingerprint = daemon.create_contact().await?;
            println!("{fingerprint}");
        }
        ContactCommands::List => {
            for fingerprint in daemon.contacts() {
                println!("{fingerprint}");
            }
        }
        ContactCommands::Delete { fingerprint } => {
            if !daemon.delete_contact(&fingerprint) {
                return Err(anyhow::anyhow!("No contact identity {}", fingerprint));
            }
            println!("✓ Contact deleted");
        }
    }

    daemon.shutdown();
    daemon.save_state()?;
    Ok(())
}

async fn handle_room_commands(action: RoomCommands, config: DaemonConfig) -> Result<()> {
    let daemon = open_daemon(config)?;

    match action {
        RoomCommands::Create { contacts } => {
            let id = daemon.create_room(&contacts).await?;
            println!("{id}");
        }
        RoomCommands::Add { room, contact } => {
            let fingerprint = daemon.add_peer_to_room(&room, &contact).await?;
            println!("✓ Added {fingerprint}");
        }
        RoomCommands::Send { room, text } => {
            daemon.send_message(&room, &text).await?;
            let info = daemon.room_info(&room)?;
            let queued: usize = info.peers.iter().map(|p| p.queued).sum();
            println!("✓ Sent ({queued} queued for later delivery)");
        }
        RoomCommands::Share { room, file, mime } => {
            let size = std::fs::metadata(&file)
                .with_context(|| format!("reading {}", file.display()))?
                .len();
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| anyhow::anyhow!("{} is not a file", file.display()))?;
            let blob_id = Uuid::new_v4();
            daemon.send_file(&room, &name, mime, size, blob_id).await?;
            println!("✓ Shared {name} as {blob_id}");
        }
        RoomCommands::Name { room, name } => {
            daemon.rename_room(&room, &name).await?;
            println!("✓ Room renamed");
        }
        RoomCommands::Messages { room, count } => {
            for message in daemon.list_messages(&room, count)? {
                println!(
                    "[{}] {}: {}",
                    message.meta.time.format("%Y-%m-%d %H:%M:%S"),
                    message.meta.sender,
                    message.content_text()
                );
            }
        }
        RoomCommands::Info { room } => {
            println!("{}", serde_json::to_string_pretty(&daemon.room_info(&room)?)?);
        }
        RoomCommands::List => {
            for info in daemon.rooms() {
                println!(
                    "{}  {}  {} peer(s)  {} message(s)",
                    info.id,
                    info.name.as_deref().unwrap_or("-"),
                    info.peers.len(),
                    info.message_count
                );
            }
        }
        RoomCommands::Delete { room } => {
            daemon.delete_room(&room)?;
            println!("✓ Room deleted");
        }
    }

    daemon.shutdown();
    daemon.save_state()?;
    Ok(())
}

fn handle_config_commands(action: ConfigCommands, config: &DaemonConfig) -> Result<()> {
    match action {
        ConfigCommands::Generate { output } => {
            let output_path = output.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

            DaemonConfig::default().save(&output_path)?;
            println!("✓ Configuration generated: {}", output_path.display());
        }
        ConfigCommands::Validate { file } => {
            let config_to_validate = if let Some(path) = file {
                DaemonConfig::from_file(path)?
            } else {
                config.clone()
            };

            config_to_validate.validate()?;
            println!("✓ Configuration is valid");
        }
        ConfigCommands::Show => {
            println!("{}", config.to_toml_string()?);
        }
    }
    Ok(())
}
