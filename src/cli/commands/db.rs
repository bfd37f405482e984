use clap::Subcommand;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

use crate::cli::utils::*;
use crate::cli::OutputFormat;
use crate::database::{manager, postgres, EntityRepository, PgSession};

#[derive(Subcommand)]
pub enum DbCommands {
    #[command(about = "Check connectivity using DATABASE_URL")]
    Ping,

    #[command(about = "Create missing tables for every registered entity")]
    Init {
        #[arg(long, help = "Registry YAML file (defaults to the built-in admin catalog)")]
        file: Option<PathBuf>,
    },

    #[command(about = "Count rows of an entity")]
    Count {
        #[arg(help = "Entity name")]
        entity: String,

        #[arg(long, help = "Registry YAML file (defaults to the built-in admin catalog)")]
        file: Option<PathBuf>,
    },
}

pub async fn handle(cmd: DbCommands, output_format: OutputFormat) -> anyhow::Result<()> {
    match cmd {
        DbCommands::Ping => {
            let pool = manager::connect_from_env().await?;
            manager::health_check(&pool).await?;
            output_success(&output_format, "Database is reachable", None)
        }
        DbCommands::Init { file } => {
            let registry = load_registry(file.as_deref())?;
            let pool = manager::connect_from_env().await?;
            postgres::ensure_tables(&pool, &registry).await?;
            output_success(
                &output_format,
                &format!("Ensured {} tables", registry.len()),
                Some(json!({ "tables": registry.iter().map(|d| d.table().to_string()).collect::<Vec<_>>() })),
            )
        }
        DbCommands::Count { entity, file } => {
            let registry = Arc::new(load_registry(file.as_deref())?);
            let repository = EntityRepository::new(registry.clone(), &entity)?;
            let pool = manager::connect_from_env().await?;
            let mut session = PgSession::new(pool, registry);

            let count = repository.count(&mut session).await?;
            output_success(
                &output_format,
                &format!("{} has {} rows", entity, count),
                Some(json!({ "entity": entity, "count": count })),
            )
        }
    }
}
