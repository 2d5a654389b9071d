use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use s3stream::cli::commands;
use s3stream::config;

#[derive(Parser)]
#[command(name = "s3stream")]
#[command(version, about = "Streaming S3 client with SigV4 signing and multipart uploads", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(long, global = true)]
    config: Option<String>,

    /// Profile to use from config
    #[arg(long, global = true, env = "S3STREAM_PROFILE")]
    profile: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Disable SSL certificate verification
    #[arg(long, global = true)]
    insecure: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a presigned URL
    Presign {
        /// Object path (bucket/key, or key when the profile has a bucket)
        path: String,

        /// HTTP method to authorize
        #[arg(long, default_value = "GET")]
        method: String,

        /// Validity in seconds
        #[arg(long, default_value = "86400")]
        expires: u32,
    },

    /// Upload a file (use - for stdin)
    Put {
        /// Local file path, or - for stdin
        source: String,

        /// Object path
        dest: String,

        /// Content-Type header for the object
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Download an object (use - for stdout)
    Get {
        /// Object path
        path: String,

        /// Local file path, or - for stdout
        output: String,

        /// Byte offset to start from
        #[arg(long)]
        offset: Option<u64>,

        /// Number of bytes to read
        #[arg(long)]
        size: Option<u64>,
    },

    /// Show object metadata
    Stat {
        /// Object path
        path: String,
    },

    /// Delete an object
    Rm {
        /// Object path
        path: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // All user-visible callbacks run on one event-loop thread; part
    // uploads are I/O bound, so a current-thread runtime is enough.
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config = config::load_config(cli.config.as_deref(), cli.profile.as_deref())?;

    match cli.command {
        Commands::Presign {
            path,
            method,
            expires,
        } => {
            commands::cmd_presign(&config, &path, &method, expires)?;
        }
        Commands::Put {
            source,
            dest,
            content_type,
        } => {
            commands::cmd_put(&config, &source, &dest, content_type, cli.insecure).await?;
        }
        Commands::Get {
            path,
            output,
            offset,
            size,
        } => {
            commands::cmd_get(&config, &path, &output, offset, size, cli.insecure).await?;
        }
        Commands::Stat { path } => {
            commands::cmd_stat(&config, &path, cli.insecure).await?;
        }
        Commands::Rm { path } => {
            commands::cmd_rm(&config, &path, cli.insecure).await?;
        }
    }

    Ok(())
}
