use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use vetclinic_lib::config::ClientConfig;
use vetclinic_lib::entities::HouseholdUpdate;
use vetclinic_lib::store::SqliteCommandLayer;
use vetclinic_lib::{AppError, ClinicClient};

#[derive(Debug, Parser)]
#[command(name = "vetclinic", about = "Veterinary clinic records", version)]
struct Cli {
    /// Database file to use instead of the one under the data directory.
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Database maintenance commands.
    #[command(subcommand)]
    Db(DbCommand),
    /// Create, inspect and rename households.
    #[command(subcommand)]
    Household(HouseholdCommand),
    /// Medical record commands.
    #[command(subcommand)]
    Record(RecordCommand),
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Create the database if needed and apply pending migrations.
    Init,
}

#[derive(Debug, Subcommand)]
enum HouseholdCommand {
    /// Create a household and print it as JSON.
    Create { name: String },
    /// Print one household as JSON.
    Show { id: i64 },
    /// Change a household's name.
    Rename { id: i64, name: String },
}

#[derive(Debug, Subcommand)]
enum RecordCommand {
    /// Archive a medical record, or restore it with `--restore`.
    Archive {
        id: i64,
        #[arg(long)]
        restore: bool,
    },
}

fn main() {
    vetclinic_lib::init_logging();

    let cli = Cli::parse();
    match handle_cli(cli) {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

fn handle_cli(cli: Cli) -> Result<i32> {
    let config = ClientConfig::from_env();
    let db_path = cli.db.clone().unwrap_or_else(|| config.db_path());
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start async runtime")?;

    runtime.block_on(async move {
        let store = SqliteCommandLayer::open(&db_path)
            .await
            .with_context(|| format!("open database {}", db_path.display()))?;
        tracing::debug!(target: "vetclinic", event = "cli_db_opened", path = %db_path.display());

        let code = match cli.command {
            Commands::Db(DbCommand::Init) => {
                println!("Database ready at {}", db_path.display());
                0
            }
            Commands::Household(command) => {
                let client = ClinicClient::new(config, Arc::new(store.clone()));
                let code = handle_household(&client, command).await?;
                client.router().wait_idle().await;
                code
            }
            Commands::Record(RecordCommand::Archive { id, restore }) => {
                let client = ClinicClient::new(config, Arc::new(store.clone()));
                let result = client.archive_medical_record(id, !restore).await;
                client.router().wait_idle().await;
                match result {
                    Ok(record) => {
                        let verb = if record.is_archived { "archived" } else { "restored" };
                        println!("Medical record {id} {verb}.");
                        0
                    }
                    Err(err) => report(&err),
                }
            }
        };
        store.pool().close().await;
        Result::<i32>::Ok(code)
    })
}

async fn handle_household(client: &ClinicClient, command: HouseholdCommand) -> Result<i32> {
    let result = match command {
        HouseholdCommand::Create { name } => client.create_household(&name).await,
        HouseholdCommand::Show { id } => client.household(id).await,
        HouseholdCommand::Rename { id, name } => {
            let update = HouseholdUpdate {
                household_name: Some(name),
                ..HouseholdUpdate::default()
            };
            client.update_household(id, update).await
        }
    };
    match result {
        Ok(household) => {
            let json = serde_json::to_string_pretty(&household).context("serialize household")?;
            println!("{json}");
            Ok(0)
        }
        Err(err) => Ok(report(&err)),
    }
}

fn report(err: &AppError) -> i32 {
    eprintln!("Error: {} ({})", err.message(), err.code());
    if err.is_validation() {
        2
    } else {
        1
    }
}
