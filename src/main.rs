//! Tsubame Uploadr - pre-signed upload URL server and upload client

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tsubame_uploadr::client::{self, SelectedFile, UploadController, UploadEvent, UploadStatus};
use tsubame_uploadr::config::{Config, LoggingConfig};
use tsubame_uploadr::server::Server;

/// Tsubame Uploadr - direct-to-storage uploads with pre-signed URLs
#[derive(Parser, Debug)]
#[command(name = "tsubame-uploadr")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file; environment variables are used when it does not exist
    #[arg(short, long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the upload URL issuance server
    Serve,

    /// Upload local files through an issuance server
    Upload {
        /// Base URL of the issuance server
        #[arg(long)]
        issuer_url: Option<String>,

        /// MIME type for every file (inferred from the extension by default)
        #[arg(long)]
        content_type: Option<String>,

        /// Files to upload
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if args.config.exists() {
        Config::load(&args.config)
            .with_context(|| format!("Failed to load {}", args.config.display()))?
    } else {
        Config::from_env().context("Failed to read configuration from environment")?
    };
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_logging(&config.logging)?;
    info!("Starting Tsubame Uploadr v{}", tsubame_uploadr::VERSION);

    match args.command {
        Command::Serve => serve(config).await,
        Command::Upload {
            issuer_url,
            content_type,
            files,
        } => {
            if let Some(url) = issuer_url {
                config.client.issuer_url = url;
            }
            upload(config, content_type, files).await
        }
    }
}

fn init_logging(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("Invalid log level")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr);

    let result = if logging.format == "pretty" {
        builder.pretty().try_init()
    } else {
        builder.json().try_init()
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let server = Server::new(config).await?;
    info!("Listening on {}", server.local_addr());

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;
    Ok(())
}

async fn upload(
    config: Config,
    content_type: Option<String>,
    files: Vec<PathBuf>,
) -> anyhow::Result<()> {
    let controller = UploadController::from_config(&config.client)?;

    let mut selected = Vec::with_capacity(files.len());
    for path in &files {
        let file = SelectedFile::from_path(path, content_type.as_deref())
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        selected.push(file);
    }

    let mut events = controller.subscribe();
    let ids = controller.add_files(selected);
    let rejected = files.len() - ids.len();
    if let Some(banner) = controller.banner() {
        warn!("{}", banner);
    }

    let reporter = tokio::spawn(async move {
        while let Some(event) = client::next_event(&mut events).await {
            if let UploadEvent::Updated(record) = event {
                info!(
                    file = %record.name,
                    status = %record.status,
                    progress = record.progress,
                    "Upload progress"
                );
            }
        }
    });

    tokio::select! {
        _ = controller.wait_idle() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, canceling uploads");
            for id in &ids {
                controller.cancel(*id);
            }
        }
    }
    reporter.abort();

    let records = controller.snapshot();
    let mut failed = 0;
    for record in &records {
        match (&record.status, &record.file_key, &record.file_url) {
            (UploadStatus::Completed, Some(key), Some(url)) => println!("{}\t{}", key, url),
            _ => {
                failed += 1;
                error!(
                    file = %record.name,
                    status = %record.status,
                    error = record.error.as_deref().unwrap_or(""),
                    "Upload did not complete"
                );
            }
        }
    }

    let interrupted = ids.len() - records.len();
    if rejected + failed + interrupted > 0 {
        anyhow::bail!(
            "{} of {} files were not uploaded",
            rejected + failed + interrupted,
            files.len()
        );
    }
    Ok(())
}
