use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use credguard::actions::{build_registry, Services};
use credguard::config::Config;
use credguard::error::Result;
use credguard::ipc;
use credguard::ipc::messages::{IpcMessage, StatusRequest, StatusResponse};
use credguard::sync::NoopSync;
use credguard::systemauth::prompter::{
    CommandPrompter, ConsentPrompter, DenyingPrompter, NoOsAuth,
};
use credguard::systemauth::SessionStore;
use credguard::vault::Vault;

#[derive(Parser)]
#[command(name = "credguard")]
#[command(about = "Local credential agent for an unlocked password vault")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent daemon
    Daemon {
        /// Path of the listening socket
        #[arg(long)]
        socket: Option<PathBuf>,
        /// Path of the encrypted config file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Consent helper binary (pinentry-style). Without one, every
        /// approval is denied.
        #[arg(long)]
        prompter: Option<PathBuf>,
    },
    /// Query a running agent's lock state
    Status {
        #[arg(long)]
        socket: Option<PathBuf>,
    },
}

fn default_socket_path() -> PathBuf {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
        .join("credguard.sock")
}

fn default_config_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("credguard")
        .join("config.json")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Daemon {
            socket,
            config,
            prompter,
        } => {
            let socket = socket.unwrap_or_else(default_socket_path);
            let config_path = config.unwrap_or_else(default_config_path);
            if let Some(dir) = config_path.parent() {
                std::fs::create_dir_all(dir)?;
            }

            let prompter: Arc<dyn ConsentPrompter> = match prompter {
                Some(program) => Arc::new(CommandPrompter::new(program)),
                None => Arc::new(DenyingPrompter),
            };

            let services = Arc::new(Services {
                config: Arc::new(Config::load(&config_path)?),
                vault: Arc::new(Vault::new()),
                sessions: Arc::new(SessionStore::new()),
                prompter,
                os_auth: Arc::new(NoOsAuth),
                sync: Arc::new(NoopSync),
            });
            let registry = Arc::new(build_registry());

            ipc::serve(&socket, services, registry).await
        }
        Commands::Status { socket } => {
            let socket = socket.unwrap_or_else(default_socket_path);
            let response =
                ipc::request(&socket, &IpcMessage::from_payload(&StatusRequest {})?).await?;
            let status: StatusResponse = response.parse_payload()?;
            println!("logged in: {}", status.logged_in);
            println!("locked: {}", status.locked);
            Ok(())
        }
    }
}
