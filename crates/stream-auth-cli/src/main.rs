//! stream-auth CLI: `stream-auth` command.
//!
//! Manages publish credentials and answers media-server callbacks from the
//! command line, against either a local state file or a NATS KV bucket.

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use stream_auth::callback::{self, CallbackKind, CallbackResponse};
use stream_auth::config::{open_store, BackendKind, StoreConfig};
use stream_auth::sweeper::{ExpirySweeper, DEFAULT_SWEEP_INTERVAL};
use stream_auth::{parse_expiry, AuthOutcome, NewStream, Store, StreamId};

// ── CLI structure ─────────────────────────────────────────────────────────────

/// stream-auth CLI: manage publish credentials for RTMP/SRT servers.
#[derive(Parser, Debug)]
#[command(
    name = "stream-auth",
    about = "Publish authorization for RTMP/SRT media servers",
    version,
    long_about = "stream-auth: publish authorization for RTMP/SRT media servers\n\nAdd, block and expire stream credentials, and answer nginx-rtmp,\nsrtrelay and SRS publish callbacks."
)]
struct Cli {
    /// JSON config file; flags below override its values
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Persistence backend (file, nats)
    #[arg(long, global = true)]
    backend: Option<BackendKind>,

    /// State file for the file backend
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// NATS server URL for the nats backend
    #[arg(long, global = true)]
    nats_url: Option<String>,

    /// JetStream KV bucket
    #[arg(long, global = true)]
    bucket: Option<String>,

    /// Key inside the bucket holding the state
    #[arg(long, global = true)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List all stream credentials
    List,

    /// Add a stream credential
    Add {
        /// Application name (e.g. live)
        #[arg(long, default_value = "")]
        app: String,

        /// Stream name
        #[arg(long)]
        name: String,

        /// Key the publisher must present
        #[arg(long)]
        auth_key: String,

        /// Expiry: ISO 8601 duration (P30D, PT12H), RFC 3339 instant, or empty for never
        #[arg(long, default_value = "")]
        expire: String,

        /// Free-form notes
        #[arg(long, default_value = "")]
        notes: String,
    },

    /// Remove a stream credential
    Remove {
        /// Stream ID
        id: String,
    },

    /// Refuse publishing with a credential
    Block {
        /// Stream ID
        id: String,
    },

    /// Allow publishing with a blocked credential again
    Unblock {
        /// Stream ID
        id: String,
    },

    /// Check whether a publish would be allowed, without marking it active
    Check {
        #[arg(long, default_value = "")]
        app: String,

        #[arg(long)]
        name: String,

        #[arg(long)]
        auth_key: String,
    },

    /// Remove all expired credentials now
    Expire,

    /// Answer a publish callback (nats backend only); the body is read from stdin
    Publish {
        /// Content type of the callback body (application/json for SRS)
        #[arg(long, default_value = "application/x-www-form-urlencoded")]
        content_type: String,
    },

    /// Answer an unpublish callback (nats backend only); the body is read from stdin
    Unpublish {
        #[arg(long, default_value = "application/x-www-form-urlencoded")]
        content_type: String,
    },

    /// Periodically remove expired credentials until interrupted
    Sweep {
        /// Seconds between sweeps
        #[arg(long, default_value_t = DEFAULT_SWEEP_INTERVAL.as_secs())]
        interval: u64,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    env_logger::init();

    let cli = Cli::parse();
    let result = run(cli).await;

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli)?;
    if matches!(cli.command, Commands::Publish { .. } | Commands::Unpublish { .. }) {
        require_shared_backend(config.backend)?;
    }
    let store = open_store(&config)
        .await
        .context("failed to open credential store")?;

    match cli.command {
        Commands::List => cmd_list(&store).await,
        Commands::Add {
            app,
            name,
            auth_key,
            expire,
            notes,
        } => cmd_add(&store, app, name, auth_key, &expire, notes).await,
        Commands::Remove { id } => cmd_remove(&store, &id).await,
        Commands::Block { id } => cmd_block(&store, &id, true).await,
        Commands::Unblock { id } => cmd_block(&store, &id, false).await,
        Commands::Check {
            app,
            name,
            auth_key,
        } => cmd_check(&store, &app, &name, &auth_key).await,
        Commands::Expire => cmd_expire(&store).await,
        Commands::Publish { content_type } => {
            cmd_callback(&store, &content_type, CallbackKind::Publish).await
        }
        Commands::Unpublish { content_type } => {
            cmd_callback(&store, &content_type, CallbackKind::Unpublish).await
        }
        Commands::Sweep { interval } => cmd_sweep(store, interval).await,
    }
}

/// Config file (if any) with command-line overrides applied.
fn load_config(cli: &Cli) -> Result<StoreConfig> {
    let mut config = match &cli.config {
        Some(path) => StoreConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => StoreConfig::default(),
    };

    if let Some(backend) = cli.backend {
        config.backend = backend;
    }
    if let Some(path) = &cli.store {
        config.file.path = path.clone();
    }
    if let Some(url) = &cli.nats_url {
        config.nats.url = url.clone();
    }
    if let Some(bucket) = &cli.bucket {
        config.nats.bucket = bucket.clone();
    }
    if let Some(key) = &cli.key {
        config.nats.key = key.clone();
    }
    Ok(config)
}

// ── Command implementations ───────────────────────────────────────────────────

/// `stream-auth list`
async fn cmd_list(store: &Store) -> Result<()> {
    let state = store.snapshot().await.context("failed to read streams")?;

    if state.streams.is_empty() {
        println!("No streams configured");
        return Ok(());
    }

    println!(
        "{:<36} {:<12} {:<20} {:<20} {:<25} {:<8} NOTES",
        "ID", "APP", "NAME", "KEY", "EXPIRES", "STATE"
    );
    println!("{}", "-".repeat(132));

    for stream in &state.streams {
        let status = match (stream.blocked, stream.active) {
            (true, _) => "blocked",
            (false, true) => "live",
            (false, false) => "idle",
        };
        println!(
            "{:<36} {:<12} {:<20} {:<20} {:<25} {:<8} {}",
            stream.id,
            stream.application,
            stream.name,
            stream.auth_key,
            stream.auth_expire.describe(),
            status,
            stream.notes
        );
    }

    Ok(())
}

/// `stream-auth add --name NAME --auth-key KEY [--app APP] [--expire EXPIRY] [--notes TEXT]`
async fn cmd_add(
    store: &Store,
    app: String,
    name: String,
    auth_key: String,
    expire: &str,
    notes: String,
) -> Result<()> {
    let auth_expire = parse_expiry(expire, stream_auth::time::now_secs())?;
    let new = NewStream::new(app, name, auth_key, auth_expire).with_notes(notes);
    let stream = store.add_stream(new).await.context("failed to add stream")?;

    println!("Added stream {}/{}", stream.application, stream.name);
    println!("  ID:      {}", stream.id);
    println!("  Expires: {}", stream.auth_expire.describe());
    Ok(())
}

/// `stream-auth remove ID`
async fn cmd_remove(store: &Store, id: &str) -> Result<()> {
    let id = existing_id(store, id).await?;
    store
        .remove_stream(&id)
        .await
        .context("failed to remove stream")?;
    println!("Removed stream {id}");
    Ok(())
}

/// `stream-auth block ID` / `stream-auth unblock ID`
async fn cmd_block(store: &Store, id: &str, blocked: bool) -> Result<()> {
    let id = existing_id(store, id).await?;
    store
        .set_blocked(&id, blocked)
        .await
        .context("failed to update stream")?;
    let verb = if blocked { "Blocked" } else { "Unblocked" };
    println!("{verb} stream {id}");
    Ok(())
}

/// `stream-auth check --name NAME --auth-key KEY [--app APP]`
async fn cmd_check(store: &Store, app: &str, name: &str, auth_key: &str) -> Result<()> {
    let decision = store
        .auth(app, name, auth_key)
        .await
        .context("failed to check credentials")?;

    let reason = match decision.outcome {
        AuthOutcome::Allowed => {
            println!("allowed");
            return Ok(());
        }
        AuthOutcome::UnknownCredentials => "unknown credentials",
        AuthOutcome::Blocked => "stream is blocked",
        AuthOutcome::StreamInUse => "stream is already live",
    };
    Err(anyhow!("denied: {reason}"))
}

/// `stream-auth expire`
async fn cmd_expire(store: &Store) -> Result<()> {
    let removed = store.expire().await.context("failed to expire streams")?;
    if removed.is_empty() {
        println!("No expired streams");
    } else {
        for id in &removed {
            println!("Expired {id}");
        }
    }
    Ok(())
}

/// `stream-auth publish|unpublish [--content-type TYPE] < BODY`
async fn cmd_callback(store: &Store, content_type: &str, kind: CallbackKind) -> Result<()> {
    let mut body = Vec::new();
    std::io::stdin()
        .read_to_end(&mut body)
        .context("failed to read callback body from stdin")?;
    strip_line_ending(&mut body);

    let response = match callback::parse_request(content_type, &body, kind) {
        Ok(request) => match kind {
            CallbackKind::Publish => callback::handle_publish(store, &request).await,
            CallbackKind::Unpublish => callback::handle_unpublish(store, &request).await,
        },
        Err(e) => {
            log::warn!("Failed to parse callback: {e}");
            CallbackResponse::Unauthorized
        }
    };

    println!("{}", response.body());
    match response {
        CallbackResponse::Accepted => Ok(()),
        CallbackResponse::Unauthorized => Err(anyhow!("callback refused ({})", response.status())),
    }
}

/// `stream-auth sweep [--interval SECS]`
async fn cmd_sweep(store: Store, interval: u64) -> Result<()> {
    if interval == 0 {
        return Err(anyhow!("interval must be > 0"));
    }
    let period = Duration::from_secs(interval);
    println!("Sweeping expired streams every {interval}s, Ctrl-C to stop");

    let sweeper = ExpirySweeper::spawn(store, period);
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    sweeper.shutdown().await;
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Live flags only outlive a single command on the nats backend; the file
/// backend clears them every time it is opened.
fn require_shared_backend(backend: BackendKind) -> Result<()> {
    match backend {
        BackendKind::Nats => Ok(()),
        BackendKind::File => Err(anyhow!(
            "publish/unpublish need --backend nats: the file backend forgets live streams between runs"
        )),
    }
}

/// Drop one trailing `\n` or `\r\n`, as left by `echo`.
fn strip_line_ending(body: &mut Vec<u8>) {
    if body.last() == Some(&b'\n') {
        body.pop();
        if body.last() == Some(&b'\r') {
            body.pop();
        }
    }
}

/// Resolve `id` to a stored stream, so typos are reported instead of
/// silently ignored.
async fn existing_id(store: &Store, id: &str) -> Result<StreamId> {
    let id = StreamId::from(id);
    let state = store.snapshot().await.context("failed to read streams")?;
    if state.stream(&id).is_none() {
        return Err(anyhow!("stream '{id}' not found"));
    }
    Ok(id)
}
