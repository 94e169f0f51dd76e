use anyhow::{Context, Result};
use bridgecrypt::bucket::{BucketManager, PublicPermissions};
use bridgecrypt::config::{self, Config, StoreConfig};
use bridgecrypt::download::Downloader;
use bridgecrypt::events::TransferEvent;
use bridgecrypt::key_manager::{KeyManager, KeyPair};
use bridgecrypt::upload::{FileSource, Uploader};
use bridgecrypt::Session;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, Write};
use std::path::PathBuf;
use tokio::fs;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// bridgecrypt - client-side encrypted storage on a sharded bridge network
#[derive(Parser)]
#[command(name = "bridgecrypt")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Bucket to operate on (overrides the configured bucket)
    #[arg(short, long, global = true)]
    bucket: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a config file and provision the client key pair
    Init {
        /// Bridge base URL
        #[arg(long, default_value = config::DEFAULT_BRIDGE)]
        bridge: String,

        /// Client key pair file path
        #[arg(short, long, default_value = "./bridgecrypt.key")]
        key_path: String,

        /// Stage transfers in temporary files under this directory instead of memory
        #[arg(long)]
        store_dir: Option<PathBuf>,
    },

    /// Show bridge information
    Info,

    /// Encrypt and upload files
    Upload {
        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Remote directory prefix
        #[arg(short, long, default_value = "/")]
        destination: String,
    },

    /// Download and decrypt a file
    Download {
        /// File id
        file_id: String,

        /// Output file path (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Manage buckets
    #[command(subcommand)]
    Bucket(BucketCommands),

    /// Generate a key pair
    Keygen {
        /// Save the key pair here instead of printing the private key
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum BucketCommands {
    /// Create a bucket registered under the client key pair
    Create { name: String },

    /// List buckets
    List,

    /// Show a bucket and its files
    Get { id: String },

    /// Delete a bucket
    Delete {
        id: String,

        /// Skip confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Grant or revoke anonymous push/pull access
    MakePublic {
        id: String,

        #[arg(long)]
        push: bool,

        #[arg(long)]
        pull: bool,

        /// Publish this key pair file's private key instead of the bucket's current key
        #[arg(long)]
        key: Option<PathBuf>,

        /// Publish this hex private key (as printed by `keygen`)
        #[arg(long, conflicts_with = "key")]
        key_hex: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Use RUST_LOG to control log level (e.g., RUST_LOG=info,bridgecrypt=debug)
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    info!(command = ?cli.command, "bridgecrypt starting");

    match cli.command {
        Commands::Init {
            bridge,
            key_path,
            store_dir,
        } => cmd_init(&cli.config, bridge, cli.bucket, key_path, store_dir).await,

        Commands::Keygen { output } => cmd_keygen(output).await,

        Commands::Info => {
            let (_, session) = load_session(&cli.config, cli.bucket)?;
            cmd_info(&session).await
        }

        Commands::Upload { files, destination } => {
            let (_, session) = load_session(&cli.config, cli.bucket)?;
            cmd_upload(session, files, &destination).await
        }

        Commands::Download { file_id, output } => {
            let (_, session) = load_session(&cli.config, cli.bucket)?;
            cmd_download(session, &file_id, output).await
        }

        Commands::Bucket(sub) => {
            let (cfg, session) = load_session(&cli.config, cli.bucket)?;
            cmd_bucket(&cfg, session, sub).await
        }
    }
}

/// Load config (env overrides applied) and build the session it describes
fn load_session(config_path: &str, bucket: Option<String>) -> Result<(Config, Session)> {
    let mut cfg = Config::load_with_env(Some(config_path))?;
    if let Some(bucket) = bucket {
        cfg.bucket_id = Some(bucket);
    }
    let session = Session::from_config(&cfg)?;
    Ok((cfg, session))
}

/// Create a spinner for indeterminate operations
fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(std::time::Duration::from_millis(100));
    pb
}

/// Create a progress bar counting completed files
fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message(message.to_string());
    pb
}

async fn cmd_init(
    config_path: &str,
    bridge: String,
    bucket: Option<String>,
    key_path: String,
    store_dir: Option<PathBuf>,
) -> Result<()> {
    println!("Initializing bridgecrypt...");

    if fs::try_exists(config_path).await.unwrap_or(false) {
        anyhow::bail!(
            "Configuration file '{}' already exists. Remove it first or use a different path.",
            config_path
        );
    }

    let mut cfg = Config::new(bridge);
    cfg.bucket_id = bucket;
    cfg.key_path = key_path;
    if let Some(dir) = store_dir {
        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating store directory {:?}", dir))?;
        cfg.store = StoreConfig::Filesystem { dir: Some(dir) };
    }
    cfg.validate()?;

    let keys = KeyManager::load_or_generate(&cfg.key_path).await?;

    let config_json = serde_json::to_string_pretty(&cfg)?;
    fs::write(config_path, config_json)
        .await
        .with_context(|| format!("writing config to '{}'", config_path))?;

    println!("Initialization complete!");
    println!("Config:     {}", config_path);
    println!("Key pair:   {}", cfg.key_path);
    println!("Public key: {}", keys.public_key());
    println!();
    println!("IMPORTANT: Keep your key file secure and backed up!");
    println!("Private buckets also need a keypass (BRIDGECRYPT_KEYPASS) to decrypt files.");

    Ok(())
}

async fn cmd_keygen(output: Option<PathBuf>) -> Result<()> {
    match output {
        Some(path) => {
            if fs::try_exists(&path).await.unwrap_or(false) {
                anyhow::bail!("Key file {:?} already exists", path);
            }
            let keys = KeyManager::load_or_generate(&path).await?;
            println!("Saved key pair to {:?}", path);
            println!("Public key: {}", keys.public_key());
        }
        None => {
            let keys = KeyPair::generate();
            println!("Public key:  {}", keys.public_key());
            println!("Private key: {}", keys.private_key().as_str());
        }
    }
    Ok(())
}

async fn cmd_info(session: &Session) -> Result<()> {
    let info = session.info().await.context("fetching bridge info")?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

async fn cmd_upload(session: Session, files: Vec<PathBuf>, destination: &str) -> Result<()> {
    let mut sources = Vec::with_capacity(files.len());
    for path in &files {
        sources.push(
            FileSource::open(path)
                .await
                .with_context(|| format!("opening {:?}", path))?,
        );
    }

    let mut uploader = Uploader::new(session);
    let mut events = uploader.subscribe();
    let pb = create_progress_bar(sources.len() as u64, "Uploading");
    let progress = pb.clone();
    let watcher = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TransferEvent::State { state, .. } => progress.set_message(state.to_string()),
                TransferEvent::Uploaded(file) => {
                    progress.inc(1);
                    progress.println(format!("  {} -> {}", file.filename, file.id));
                }
                TransferEvent::Failed { state, message, .. } => {
                    progress.inc(1);
                    progress.println(format!("  failed at {}: {}", state, message));
                }
                _ => {}
            }
        }
    });

    let results = uploader.upload_many(sources, destination).await;
    drop(uploader);
    let _ = watcher.await;

    let failed = results.iter().filter(|r| r.is_err()).count();
    pb.finish_with_message(format!(
        "Uploaded {}/{} files",
        results.len() - failed,
        results.len()
    ));

    if let Some(Err(first)) = results.into_iter().find(|r| r.is_err()) {
        return Err(first).context(format!("{} upload(s) failed", failed));
    }
    Ok(())
}

async fn cmd_download(session: Session, file_id: &str, output: Option<PathBuf>) -> Result<()> {
    let bucket_id = session
        .bucket_id()
        .map(str::to_string)
        .context("no bucket configured; pass --bucket or set BRIDGECRYPT_BUCKET_ID")?;
    let downloader = Downloader::new(session);
    let spinner = create_spinner(&format!("Downloading {}...", file_id));

    match output {
        Some(path) => {
            let mut file = fs::File::create(&path)
                .await
                .with_context(|| format!("creating {:?}", path))?;
            match downloader.download_to(&bucket_id, file_id, &mut file).await {
                Ok(summary) => spinner.finish_with_message(format!(
                    "Downloaded {} bytes -> {:?}",
                    summary.bytes, path
                )),
                Err(e) => {
                    spinner.finish_and_clear();
                    drop(file);
                    // Never leave unauthenticated plaintext behind
                    let _ = fs::remove_file(&path).await;
                    return Err(e.into());
                }
            }
        }
        None => {
            let file = downloader.download(&bucket_id, file_id).await;
            spinner.finish_and_clear();
            let file = file?;
            io::stdout().write_all(&file.data)?;
            eprintln!("Downloaded {} bytes to stdout", file.data.len());
        }
    }

    Ok(())
}

async fn cmd_bucket(cfg: &Config, session: Session, command: BucketCommands) -> Result<()> {
    let buckets = BucketManager::new(session);

    match command {
        BucketCommands::Create { name } => {
            let keys = KeyManager::load_or_generate(&cfg.key_path).await?;
            let bucket = buckets.create_bucket(&name, &keys).await?;
            println!("Created bucket '{}' ({})", bucket.name, bucket.id);
        }
        BucketCommands::List => {
            let list = buckets.get_buckets().await?;
            if list.is_empty() {
                println!("No buckets found");
            }
            for bucket in list {
                println!("  {:<28} {}", bucket.id, bucket.name);
            }
        }
        BucketCommands::Get { id } => {
            let details = buckets.get_bucket(&id).await?;
            println!("{}", serde_json::to_string_pretty(&details)?);
        }
        BucketCommands::Delete { id, yes } => {
            if !yes {
                print!("Delete bucket '{}'? This cannot be undone. [y/N]: ", id);
                io::stdout().flush()?;

                let mut response = String::new();
                io::stdin().read_line(&mut response)?;

                if !response.trim().eq_ignore_ascii_case("y") {
                    println!("Cancelled.");
                    return Ok(());
                }
            }
            buckets.delete_bucket(&id).await?;
            println!("Deleted bucket '{}'", id);
        }
        BucketCommands::MakePublic {
            id,
            push,
            pull,
            key,
            key_hex,
        } => {
            let permissions = PublicPermissions { push, pull };
            let shared = match (key, key_hex) {
                (Some(path), _) => Some(KeyManager::load(&path).await?),
                (None, Some(hex_key)) => Some(KeyPair::from_private_hex(&hex_key)?),
                (None, None) => None,
            };
            let public = match shared {
                Some(shared) => {
                    buckets
                        .make_public_with_key(&id, permissions, &shared)
                        .await?
                }
                None => buckets.make_public(&id, permissions).await?,
            };
            println!("{}", serde_json::to_string_pretty(&public)?);
        }
    }

    Ok(())
}
