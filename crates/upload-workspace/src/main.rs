use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use upload_workspace::{Config, ContentHandle, UploadedFile, WorkspaceManager};

#[derive(Parser)]
#[command(name = "upload-workspace")]
#[command(version)]
#[command(about = "Manage manuscript upload workspaces")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path (defaults to $CONFIG_FILE or config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (overrides config file)
    #[arg(short = 'v', long)]
    log_level: Option<String>,

    /// Storage base directory (overrides config file)
    #[arg(short = 'b', long, value_name = "DIR")]
    base_directory: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a workspace from a first upload
    Create {
        file: PathBuf,
        #[arg(long)]
        hint: Option<String>,
        #[arg(long, default_value = "cli")]
        owner: String,
    },
    /// Add a file to an existing workspace
    Add {
        upload_id: u64,
        file: PathBuf,
        #[arg(long)]
        hint: Option<String>,
        #[arg(long, default_value = "cli")]
        owner: String,
        /// Store under anc/
        #[arg(long)]
        ancillary: bool,
    },
    /// Print a workspace summary
    Summary { upload_id: u64 },
    /// Delete one file from the source tree
    DeleteFile { upload_id: u64, path: String },
    /// Delete every file from the source tree
    DeleteAll { upload_id: u64 },
    /// Delete a workspace permanently
    Delete { upload_id: u64 },
    Lock { upload_id: u64 },
    Unlock { upload_id: u64 },
    Release { upload_id: u64 },
    Unrelease { upload_id: u64 },
    /// Write the packaged source tree
    Content {
        upload_id: u64,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write one file from the source tree
    File {
        upload_id: u64,
        path: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the workspace log
    Log { upload_id: u64 },
    /// Print the service log
    ServiceLog,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn write_content(handle: &ContentHandle, output: Option<PathBuf>) -> Result<()> {
    let mut source = handle.open().await?;
    match output {
        Some(path) => {
            let mut file = tokio::fs::File::create(&path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?;
            tokio::io::copy(&mut source, &mut file).await?;
            file.flush().await?;
        }
        None => {
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut source, &mut stdout).await?;
            stdout.flush().await?;
        }
    }
    eprintln!("checksum: {} ({} bytes)", handle.checksum, handle.size);
    Ok(())
}

async fn read_upload(path: &Path) -> Result<UploadedFile> {
    let content = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(UploadedFile::new(filename, content)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from_file(path)?,
        None => Config::load()?,
    };
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if let Some(base_directory) = cli.base_directory {
        config.storage.base_directory = base_directory;
    }

    let log_filter = format!(
        "upload_workspace={level},upload_sandbox={level}",
        level = config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let manager = WorkspaceManager::from_config(&config);
    info!(
        "Upload workspace v{} using {}",
        env!("CARGO_PKG_VERSION"),
        manager.base_directory().display()
    );

    let shutdown = manager.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping ingestion");
            shutdown.cancel();
        }
    });

    match cli.command {
        Command::Create { file, hint, owner } => {
            let upload = read_upload(&file).await?;
            print_json(&manager.create_workspace(upload, hint, &owner).await?)?;
        }
        Command::Add {
            upload_id,
            file,
            hint,
            owner,
            ancillary,
        } => {
            let upload = read_upload(&file).await?;
            print_json(
                &manager
                    .add_to_workspace(upload_id, upload, hint, &owner, ancillary)
                    .await?,
            )?;
        }
        Command::Summary { upload_id } => print_json(&manager.get_summary(upload_id).await?)?,
        Command::DeleteFile { upload_id, path } => {
            print_json(&manager.delete_file(upload_id, &path).await?)?;
        }
        Command::DeleteAll { upload_id } => {
            print_json(&manager.delete_all_files(upload_id).await?)?;
        }
        Command::Delete { upload_id } => {
            manager.delete_workspace(upload_id).await?;
            println!("Deleted upload {upload_id}");
        }
        Command::Lock { upload_id } => print_json(&manager.lock(upload_id).await?)?,
        Command::Unlock { upload_id } => print_json(&manager.unlock(upload_id).await?)?,
        Command::Release { upload_id } => print_json(&manager.release(upload_id).await?)?,
        Command::Unrelease { upload_id } => print_json(&manager.unrelease(upload_id).await?)?,
        Command::Content { upload_id, output } => {
            write_content(&manager.get_content(upload_id).await?, output).await?;
        }
        Command::File {
            upload_id,
            path,
            output,
        } => {
            write_content(&manager.get_file_content(upload_id, &path).await?, output).await?;
        }
        Command::Log { upload_id } => {
            write_content(&manager.get_source_log(upload_id).await?, None).await?;
        }
        Command::ServiceLog => {
            write_content(&manager.get_service_log().await?, None).await?;
        }
    }

    Ok(())
}
