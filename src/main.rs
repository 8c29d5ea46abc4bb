use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use carik_runtime::application::errors::BotError;
use carik_runtime::application::manager::ExtensionManager;
use carik_runtime::domain::entities::manifest::MANIFEST_FILE_NAMES;
use carik_runtime::domain::entities::PluginManifest;
use carik_runtime::domain::traits::Database;
use carik_runtime::infrastructure::adapters::console::ConsoleAdapter;
use carik_runtime::infrastructure::config::Config;
use carik_runtime::infrastructure::database::SqliteDatabase;
use carik_runtime::infrastructure::logging;
use carik_runtime::infrastructure::plugins::{CompositeLoader, NativeLoader};
use carik_runtime::infrastructure::router::RouteTable;
use carik_runtime::plugins::builtin_loader;

#[derive(Parser)]
#[command(name = "carik-runtime")]
#[command(about = "Capability-gated extension runtime for carik-bot", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Plugin directory (overrides config)
    #[arg(short, long)]
    plugins: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Load plugins and start the console host
    Run,
    /// Check a plugin manifest against the active security policy
    Validate {
        /// Plugin directory or manifest file
        path: PathBuf,
    },
    /// List plugin manifests without loading them
    List {
        /// Directory to scan (defaults to the configured one)
        dir: Option<PathBuf>,
    },
    /// Show version
    Version,
    /// Generate default config
    InitConfig {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match Config::resolve(&cli.config) {
        Ok(mut config) => {
            if let Some(dir) = cli.plugins {
                config.plugins.directory = dir;
            }
            logging::init(&config.logging.level);
            match cli.command {
                Commands::Run => run(config).await,
                Commands::Validate { path } => validate(&config, &path),
                Commands::List { dir } => list(dir.as_deref().unwrap_or(config.plugins.directory.as_path())),
                Commands::Version => {
                    println!("carik-runtime v{}", env!("CARGO_PKG_VERSION"));
                    Ok(())
                }
                Commands::InitConfig { output } => init_config(output.as_deref()),
            }
        }
        Err(e) => Err(BotError::from(e)),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn open_database(config: &Config) -> Result<Option<Arc<dyn Database>>, BotError> {
    let Some(path) = &config.database.path else {
        tracing::info!("No database configured");
        return Ok(None);
    };
    let db = if path.as_os_str() == ":memory:" {
        SqliteDatabase::open_in_memory()?
    } else {
        SqliteDatabase::open(path)?
    };
    tracing::info!("Database initialized at {}", path.display());
    Ok(Some(Arc::new(db)))
}

async fn run(config: Config) -> Result<(), BotError> {
    tracing::info!(
        tier = %config.security.tier,
        "Starting {} v{}",
        config.bot.name,
        env!("CARGO_PKG_VERSION")
    );

    let routes = RouteTable::new();
    let loader = CompositeLoader::new()
        .with(Arc::new(builtin_loader()))
        .with(Arc::new(NativeLoader::new()));

    let mut builder = ExtensionManager::builder(config.manager_settings())
        .with_security(config.security_manager())
        .with_loader(Arc::new(loader))
        .with_router(Arc::new(routes.clone()));
    if let Some(db) = open_database(&config)? {
        builder = builder.with_database(db);
    }
    let manager = builder.build();

    if config.plugins.auto_load {
        let summary = manager.load_all(&config.plugins.directory).await?;
        for (path, error) in &summary.failed {
            tracing::warn!("Failed to load plugin {}: {}", path.display(), error);
        }
    }
    let health = manager.start_health_checks();

    let console = ConsoleAdapter::new(manager.clone(), config.bot.prefix.clone()).with_routes(routes);
    let outcome = console.run().await;

    let shutdown = manager.shutdown().await;
    let _ = health.await;
    outcome?;
    shutdown?;
    tracing::info!("Runtime stopped");
    Ok(())
}

fn validate(config: &Config, path: &Path) -> Result<(), BotError> {
    let (manifest, base_dir) = PluginManifest::from_path(path)?;
    manifest.validate_structure()?;
    let limits = config.security_manager().validate_manifest(&manifest)?;

    println!("{} v{} is valid under the {} tier", manifest.name, manifest.version, config.security.tier);
    println!("  entry point: {} (base {})", manifest.entry_point, base_dir.display());
    println!(
        "  permissions: {}",
        manifest
            .permissions
            .iter()
            .map(|p| p.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("  limits: {}", serde_json::to_string(&limits).unwrap_or_default());
    Ok(())
}

fn list(dir: &Path) -> Result<(), BotError> {
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| MANIFEST_FILE_NAMES.iter().any(|f| p.join(f).is_file()))
        .collect();
    dirs.sort();

    if dirs.is_empty() {
        println!("No plugins in {}", dir.display());
        return Ok(());
    }
    for path in dirs {
        match PluginManifest::from_path(&path) {
            Ok((manifest, _)) => println!(
                "{} v{} [{}] {}",
                manifest.name,
                manifest.version,
                manifest.entry_point,
                manifest.description.as_deref().unwrap_or_default()
            ),
            Err(e) => println!("{}: {}", path.display(), e),
        }
    }
    Ok(())
}

fn init_config(output: Option<&Path>) -> Result<(), BotError> {
    if let Some(path) = output {
        Config::default().save(path)?;
        println!("Default config written to {}", path.display());
        return Ok(());
    }
    let yaml = serde_yaml::to_string(&Config::default())
        .map_err(|e| BotError::Internal(format!("Failed to serialize config: {}", e)))?;
    println!("{}", yaml);
    println!("\nSave this to config.yaml and adjust as needed.");
    Ok(())
}
