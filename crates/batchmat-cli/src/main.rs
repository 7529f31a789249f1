use anyhow::{bail, Result};
use async_trait::async_trait;
use batchmat_aws::GlueCatalogStore;
use batchmat_core::*;
use batchmat_emulator::{EmulatorCatalog, StateExporter};
use batchmat_parser::{group_table_refs, parse_table_ref};
use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "batchmat")]
#[command(about = "Least-privilege policies and batch job definitions for catalog tables")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    /// Emulator state file for persistence (optional)
    state_file: Option<String>,

    #[arg(long, global = true)]
    /// Use the AWS Glue Data Catalog instead of the emulator
    aws: bool,

    #[arg(long, global = true)]
    /// Deployment region (with --account-id; otherwise read from the environment)
    region: Option<String>,

    #[arg(long, global = true)]
    /// AWS profile for the Glue client
    profile: Option<String>,

    #[arg(long, global = true)]
    /// Custom Glue endpoint (LocalStack)
    endpoint: Option<String>,

    #[arg(long, global = true)]
    /// Deployment account id (with --region; otherwise read from the environment)
    account_id: Option<String>,

    #[arg(long, global = true, default_value = DEFAULT_PARTITION)]
    partition: String,

    #[arg(long, global = true, default_value_t = 10_000, value_parser = clap::value_parser!(u64).range(1..))]
    /// Per-attempt catalog lookup timeout
    lookup_timeout_ms: u64,

    #[arg(long, global = true, default_value_t = 5, value_parser = clap::value_parser!(u32).range(1..))]
    /// Catalog lookup attempts, including the first
    max_attempts: u32,

    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    /// More logging (-v debug, -vv trace)
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a job manifest and print the assembled job definition
    Synth {
        #[arg(short, long)]
        manifest: String,
    },
    /// Resolve table access and print the IAM policy document
    Resolve {
        /// Table as database.table or database.* (repeatable)
        #[arg(short, long = "table", required = true)]
        tables: Vec<String>,
        /// read or write
        #[arg(short, long, default_value = "read")]
        access: String,
        /// Where missing tables will be created (write only)
        #[arg(short, long)]
        provisioning_prefix: Option<String>,
    },
    /// Validate materialization arguments and print the plan
    Materialize {
        /// Partition column of the target table (repeatable)
        #[arg(long = "partition-col")]
        partition_cols: Vec<String>,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Manage the emulator catalog
    Catalog {
        #[command(subcommand)]
        command: CatalogCommands,
    },
}

#[derive(Subcommand)]
enum CatalogCommands {
    /// Register database.table at a storage location
    Register {
        table: String,
        location: String,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Remove a table
    Drop { table: String },
    /// Show registered tables
    List,
}

impl Cli {
    fn backend_config(&self) -> BackendConfig {
        if self.aws {
            BackendConfig::Aws {
                region: self.region.clone(),
                profile: self.profile.clone(),
                endpoint: self.endpoint.clone(),
            }
        } else {
            BackendConfig::Emulator {
                state_file: self.state_file.clone(),
            }
        }
    }

    fn deploy_env(&self) -> Result<DeployEnv> {
        let env = match (&self.account_id, &self.region) {
            (Some(account_id), Some(region)) => DeployEnv::new(account_id.clone(), region.clone())?,
            (None, None) => DeployEnv::from_env()?,
            _ => bail!(
                "pass both --account-id and --region, or neither to read {} and {}",
                ACCOUNT_ENV,
                REGION_ENV
            ),
        };
        Ok(env.with_partition(self.partition.clone()))
    }

    fn locator_config(&self) -> LocatorConfig {
        LocatorConfig {
            timeout: Duration::from_millis(self.lookup_timeout_ms),
            retry: RetryConfig::with_max_attempts(self.max_attempts),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match &cli.command {
        Commands::Synth { manifest } => synth(&cli, manifest).await,
        Commands::Resolve {
            tables,
            access,
            provisioning_prefix,
        } => resolve(&cli, tables, access, provisioning_prefix.as_deref()).await,
        Commands::Materialize {
            partition_cols,
            args,
        } => materialize(args, partition_cols).await,
        Commands::Catalog { command } => catalog(&cli, command).await,
    };

    if let Err(e) = result {
        // Argument mismatches exit with usage, like a shell entry point
        if let Some(err) = e
            .downcast_ref::<Error>()
            .filter(|err| matches!(err, Error::InvocationArgument { .. }))
        {
            eprintln!("{}", err);
            std::process::exit(2);
        }
        error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}

fn init_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = if verbose > 0 {
        EnvFilter::new(default_level)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn open_store(config: BackendConfig) -> Result<Box<dyn CatalogStore>> {
    debug!(?config, "Opening catalog store");
    Ok(match config {
        BackendConfig::Emulator { state_file } => Box::new(EmulatorCatalog::new(state_file).await?),
        BackendConfig::Aws {
            region,
            profile,
            endpoint,
        } => Box::new(GlueCatalogStore::with_config(region, profile, endpoint).await?),
    })
}

async fn synth(cli: &Cli, manifest_path: &str) -> Result<()> {
    let env = cli.deploy_env()?;
    let manifest = JobManifest::load(manifest_path).await?;

    let store = open_store(cli.backend_config()).await?;
    let resolver = PolicyResolver::new(store.as_ref(), env, cli.locator_config());
    let job = manifest.build(&resolver).await?;

    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

async fn resolve(
    cli: &Cli,
    tables: &[String],
    access: &str,
    provisioning_prefix: Option<&str>,
) -> Result<()> {
    let env = cli.deploy_env()?;
    let level: AccessLevel = access.parse()?;
    let refs = tables
        .iter()
        .map(|t| parse_table_ref(t))
        .collect::<Result<Vec<_>>>()?;

    let store = open_store(cli.backend_config()).await?;
    let resolver = PolicyResolver::new(store.as_ref(), env, cli.locator_config());

    let mut statements = Vec::new();
    for mut request in group_table_refs(&refs) {
        request.provisioning_uri_prefix = provisioning_prefix.map(str::to_string);
        let policy = resolver.resolve(&request, level).await?;
        statements.push(policy.storage);
        statements.push(policy.catalog);
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&policy_document(&statements))?
    );
    Ok(())
}

/// Stands in for the query engine: reports where output would land
struct PlanOnly;

#[async_trait]
impl QueryEngine for PlanOnly {
    async fn materialize(&self, request: &MaterializeRequest) -> Result<QueryOutcome> {
        Ok(QueryOutcome {
            rows_written: None,
            output_paths: vec![request.output_location()],
        })
    }
}

async fn materialize(args: &[String], partition_cols: &[String]) -> Result<()> {
    let request = MaterializeRequest::from_args(args)?.with_partition_cols(partition_cols.to_vec());
    let outcome = request.process(&PlanOnly).await?;

    let plan = serde_json::json!({
        "request": request,
        "save_mode": request.save_mode(),
        "output_location": request.output_location(),
        "staging_output": request.staging_output(),
        "output_paths": outcome.output_paths,
    });
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

async fn catalog(cli: &Cli, command: &CatalogCommands) -> Result<()> {
    if cli.aws {
        bail!("catalog commands manage the emulator state; drop --aws");
    }
    let mut catalog = EmulatorCatalog::new(cli.state_file.clone()).await?;

    match command {
        CatalogCommands::Register {
            table,
            location,
            description,
        } => {
            let table = parse_table_ref(table)?;
            catalog
                .register_table(&table, location, description.clone())
                .await?;
            println!("✅ Registered {} → {}", table, location);
        }
        CatalogCommands::Drop { table } => {
            let table = parse_table_ref(table)?;
            if catalog.drop_table(&table).await? {
                println!("✅ Dropped {}", table);
            } else {
                println!("❌ {} is not registered", table);
            }
        }
        CatalogCommands::List => {
            println!("{}", StateExporter::to_summary(catalog.state()));
        }
    }

    if cli.state_file.is_none() && !matches!(command, CatalogCommands::List) {
        println!("💡 No --state-file given; the change was not persisted");
    }
    Ok(())
}
