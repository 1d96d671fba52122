use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use conservator_cli::config::{self, Config, ConfigStore};
use conservator_cli::sync::{Downloader, GitDatasets, SyncFlags, Uploader};
use conservator_core::ConservatorClient;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

const INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(name = "conservator")]
#[command(about = "Mirror Conservator collections to and from local folders")]
#[command(version)]
struct Cli {
    /// Enable debug logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Service base URL.
    #[arg(long, global = true)]
    url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
struct CredentialArgs {
    /// Account email, used for dataset repositories.
    #[arg(short = 'u', long)]
    email: Option<String>,

    /// API key.
    #[arg(short = 't', long = "token")]
    token: Option<String>,
}

#[derive(Args, Debug, Default)]
struct CategoryArgs {
    /// Include linked dataset repositories.
    #[arg(short = 'd', long)]
    include_datasets: bool,

    /// Include images and videos.
    #[arg(short = 'i', long)]
    include_media: bool,

    /// Include per-video metadata files.
    #[arg(short = 'm', long)]
    include_video_metadata: bool,

    /// Include associated files.
    #[arg(short = 'a', long)]
    include_associated_files: bool,
}

impl CategoryArgs {
    fn flags(&self) -> SyncFlags {
        SyncFlags {
            include_datasets: self.include_datasets,
            include_video_metadata: self.include_video_metadata,
            include_associated_files: self.include_associated_files,
            include_media: self.include_media,
            ..SyncFlags::default()
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download a remote collection tree into a local folder.
    Download {
        /// Remote collection path, e.g. /Project/Collection.
        remote_path: String,

        /// Folder that receives the collection directory.
        local_folder: PathBuf,

        #[command(flatten)]
        categories: CategoryArgs,

        /// Remove local entries that do not exist remotely.
        #[arg(short = 'o', long)]
        delete: bool,

        #[command(flatten)]
        credentials: CredentialArgs,
    },

    /// Upload a local folder tree to a remote collection path.
    Upload {
        /// Remote collection path. Its first component must be an existing project.
        remote_path: String,

        /// Folder holding the directory named like the last remote component.
        local_folder: PathBuf,

        #[command(flatten)]
        categories: CategoryArgs,

        /// Create remote collections that do not exist yet.
        #[arg(short = 'c', long)]
        create: bool,

        #[command(flatten)]
        credentials: CredentialArgs,
    },

    /// Manage the saved configuration.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Save the effective configuration to the config file.
    Save {
        #[command(flatten)]
        credentials: CredentialArgs,
    },
    /// Remove the config file.
    Delete,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            watcher.cancel();
        }
    });

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            eprintln!("interrupted");
            ExitCode::from(INTERRUPTED)
        }
        result = run(cli, cancel.clone()) => match result {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                println!("{err:#}");
                ExitCode::FAILURE
            }
        },
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("conservator_cli=debug,conservator_core=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli, cancel: CancellationToken) -> anyhow::Result<()> {
    match cli.command {
        Command::Download {
            remote_path,
            local_folder,
            categories,
            delete,
            credentials,
        } => {
            let config = resolve_config(cli.url, credentials)?;
            let client = connect(&config, cancel)?;
            let datasets = git_datasets(&config, &client)?;
            let flags = SyncFlags {
                delete,
                ..categories.flags()
            };
            let root = Downloader::new(&client, &datasets, flags)
                .download(&remote_path, &local_folder)
                .await?;
            tracing::info!(path = %root.display(), "download complete");
        }
        Command::Upload {
            remote_path,
            local_folder,
            categories,
            create,
            credentials,
        } => {
            let config = resolve_config(cli.url, credentials)?;
            let client = connect(&config, cancel)?;
            let datasets = git_datasets(&config, &client)?;
            let flags = SyncFlags {
                create,
                ..categories.flags()
            };
            let id = Uploader::new(&client, &datasets, flags)
                .upload(&remote_path, &local_folder)
                .await?;
            tracing::info!(collection = %id, "upload complete");
        }
        Command::Config { action } => config_command(action, cli.url, cancel).await?,
    }
    Ok(())
}

/// Flags win over the environment, which wins over the config file.
fn resolve_config(url: Option<String>, credentials: CredentialArgs) -> anyhow::Result<Config> {
    let store = ConfigStore::new_default()?;
    let file = store
        .load()
        .with_context(|| format!("failed to read {}", store.path().display()))?;
    let flags = Config {
        email: credentials.email,
        key: credentials.token,
        url,
    };
    Ok(file.overlay(Config::from_env()).overlay(flags))
}

fn connect(config: &Config, cancel: CancellationToken) -> anyhow::Result<ConservatorClient> {
    let key = config.require_key()?;
    let client = ConservatorClient::with_base_url(config.base_url(), key)
        .with_context(|| format!("invalid service url {}", config.base_url()))?;
    Ok(client
        .with_retry_policy(config::retry_policy_from_env())
        .with_cancellation(cancel))
}

fn git_datasets(config: &Config, client: &ConservatorClient) -> anyhow::Result<GitDatasets> {
    Ok(GitDatasets::new(
        client.base_url().clone(),
        config.email.clone(),
        config.require_key()?,
    ))
}

async fn config_command(
    action: ConfigAction,
    url: Option<String>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let store = ConfigStore::new_default()?;
    match action {
        ConfigAction::Show => {
            let config = resolve_config(url, CredentialArgs::default())?;
            println!("config file: {}", store.path().display());
            println!("email:       {}", config.email.as_deref().unwrap_or("(not set)"));
            println!("url:         {}", config.base_url());
            println!(
                "api key:     {}",
                config.masked_key().as_deref().unwrap_or("(not set)")
            );
            if config.key.is_some() {
                match connect(&config, cancel)?.current_user().await {
                    Ok(user) => println!("signed in as {}", user.email),
                    Err(err) => println!("api key check failed: {err}"),
                }
            }
        }
        ConfigAction::Save { credentials } => {
            let config = resolve_config(url, credentials)?;
            store
                .save(&config)
                .with_context(|| format!("failed to write {}", store.path().display()))?;
            println!("saved {}", store.path().display());
        }
        ConfigAction::Delete => {
            if store.delete()? {
                println!("removed {}", store.path().display());
            } else {
                println!("no config file at {}", store.path().display());
            }
        }
    }
    Ok(())
}
