use std::io::Write;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use storefront_migration_service::{
    build_services, catalog::CatalogSync, config::Config, mapping::EntityType,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "migration-ops")]
#[command(about = "Operator commands for the storefront to licensing platform migration")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror one storefront product, its plans and pricing onto the platform.
    #[command(name = "module:sync")]
    ModuleSync(ModuleSyncArgs),
    /// Print the remote id linked to a local entity.
    #[command(name = "mapping:show")]
    MappingShow(MappingShowArgs),
    /// Forget every link of the configured namespace.
    #[command(name = "mapping:clear")]
    MappingClear(MappingClearArgs),
}

#[derive(Args)]
struct ModuleSyncArgs {
    /// Local module id. Omit together with --all to sync every module.
    module_id: Option<String>,
    #[arg(long)]
    all: bool,
    /// Look the module up by slug again and replace its stored link.
    /// Plan and pricing links are kept.
    #[arg(long)]
    flush: bool,
}

#[derive(Args)]
struct MappingShowArgs {
    entity_type: EntityType,
    local_id: String,
}

#[derive(Args)]
struct MappingClearArgs {
    #[arg(long)]
    yes: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;
    match cli.command {
        Commands::ModuleSync(args) => run_module_sync(&config, args).await,
        Commands::MappingShow(args) => run_mapping_show(&config, args).await,
        Commands::MappingClear(args) => run_mapping_clear(&config, args).await,
    }
}

async fn run_module_sync(config: &Config, args: ModuleSyncArgs) -> Result<()> {
    let services = build_services(config).await?;
    let modules = match (args.module_id, args.all) {
        (Some(_), true) => bail!("pass either a module id or --all, not both"),
        (None, false) => bail!("a module id or --all is required"),
        (Some(module_id), false) => vec![services
            .source
            .module(&module_id)
            .await?
            .with_context(|| format!("module `{module_id}` is not in the storefront export"))?],
        (None, true) => services.source.modules().await?,
    };

    let catalog = CatalogSync::new(services.mapper.clone(), services.remote.clone());
    let mut reports = Vec::with_capacity(modules.len());
    for module in &modules {
        let report = catalog
            .sync_module(module, args.flush)
            .await
            .with_context(|| format!("sync module `{}`", module.local_id()))?;
        reports.push(report);
    }
    write_json(&reports)
}

async fn run_mapping_show(config: &Config, args: MappingShowArgs) -> Result<()> {
    let services = build_services(config).await?;
    let record = services
        .mapper
        .get(args.entity_type, &args.local_id)
        .await?
        .with_context(|| format!("no {} mapping for `{}`", args.entity_type, args.local_id))?;
    write_json(&record)
}

async fn run_mapping_clear(config: &Config, args: MappingClearArgs) -> Result<()> {
    if !args.yes {
        bail!(
            "refusing to clear mapping for namespace `{}` without --yes",
            config.namespace
        );
    }
    let services = build_services(config).await?;
    let removed = services.mapper.clear_mapping().await?;
    write_json(&serde_json::json!({
        "namespace": services.mapper.namespace(),
        "removed": removed,
    }))
}

fn write_json<T: Serialize>(value: &T) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).context("encode output")?;
    writeln!(stdout).context("write output")?;
    Ok(())
}
