use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use datasource_ingest::uploads::spool_upload;
use datasource_ingest::{IngestConfig, IngestionService};

#[derive(Parser)]
#[command(name = "datasource-ingest", version, about = "Ingest CSV datasources")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a CSV file as a new datasource
    Upload {
        file: PathBuf,
        /// Datasource name, defaults to the file name
        #[arg(long)]
        name: Option<String>,
        /// Declared content type, guessed from the extension when omitted
        #[arg(long)]
        mime_type: Option<String>,
    },
    /// List stored datasources, newest first
    List,
    /// Print the column names of a datasource
    Headers { id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "datasource_ingest=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = IngestConfig::from_env()?;
    info!("Configuration loaded:");
    info!("  Max upload size: {} bytes", config.max_upload_bytes);
    info!("  Metadata store: {}", config.metadata_store_url);
    info!("  Data store: {}", config.data_store_url);
    info!("  Upload dir: {}", config.upload_dir.display());

    let service = IngestionService::from_config(&config)?;

    let result = match cli.command {
        Command::Upload {
            file,
            name,
            mime_type,
        } => {
            let artifact = spool_upload(&file, &config.upload_dir, name, mime_type)
                .await
                .with_context(|| format!("Failed to spool {}", file.display()))?;
            service.ingest(artifact).await.map(|outcome| {
                println!("{}", outcome.collection_id);
            })
        }
        Command::List => service.datasources().await.map(|datasources| {
            for datasource in datasources {
                println!(
                    "{}\t{}\t{}",
                    datasource.id,
                    datasource.name,
                    datasource.created_at.to_rfc3339()
                );
            }
        }),
        Command::Headers { id } => service.headers(&id).await.map(|headers| {
            println!("{}", headers.join(","));
        }),
    };

    if let Err(e) = result {
        error!("{}", e);
        return Err(e.into());
    }
    Ok(())
}
