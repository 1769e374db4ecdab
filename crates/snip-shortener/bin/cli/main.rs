mod cli;

use crate::cli::{Command, LogFormat, CLI};
use clap::Parser;
use snip_shortener::{ServiceConfig, Shortened, ShortenerService};
use snip_storage::StorageConfig;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

type Service = ShortenerService<Arc<dyn snip_core::Storage>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = CLI::try_parse()?;
    init_tracing(config.log_format);

    let storage_config = StorageConfig {
        database_dsn: config.database_dsn.clone(),
        file_storage_path: config.file_storage_path.clone(),
    };
    info!(backend = storage_config.backend_name(), "opening storage");
    let storage = snip_storage::open(&storage_config).await;

    let service_config = ServiceConfig {
        secret_key: config.secret_key.clone(),
        ..ServiceConfig::default()
    };
    if service_config.secret_key.is_none() {
        warn!("no secret key given, tokens issued now will not verify in later runs");
    }
    let service = ShortenerService::new(storage, service_config).await?;

    run(&service, config.command).await
}

async fn run(service: &Service, command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Shorten { url, token } => {
            let grant = service.issue_or_validate_token(token.as_deref())?;
            if grant.issued {
                println!("token\t{}", grant.token);
            }
            match service.shorten(&url, &grant.token).await? {
                Shortened::Created(key) => println!("created\t{key}"),
                Shortened::Existing(key) => println!("exists\t{key}"),
            }
        }
        Command::Resolve { key } => {
            println!("{}", service.resolve(&key).await?);
        }
        Command::List { token } => {
            let mut owned: Vec<_> = service.list_owned(&token).await?.into_iter().collect();
            owned.sort();
            for (key, url) in owned {
                println!("{key}\t{url}");
            }
        }
        Command::Delete { keys, token } => {
            let count = keys.len();
            service.delete_owned(keys, &token).await?;
            info!(count, "delete requests processed");
        }
        Command::Stats => {
            service.ping().await?;
            let stats = service.stats().await?;
            println!("urls\t{}", stats.urls);
            println!("users\t{}", stats.users);
        }
        Command::Token { token } => {
            let grant = service.issue_or_validate_token(token.as_deref())?;
            let status = if grant.issued { "issued" } else { "valid" };
            println!("{status}\t{}", grant.token);
        }
    }

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
