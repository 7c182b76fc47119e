mod loaders;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use log::{error, info};
use tracing_subscriber::EnvFilter;

use plinth_core::config::{PackageSource, RuntimeConfig};
use plinth_core::kernel::{KernelComponent, Runtime, RuntimeBuilder};
use plinth_core::package_system::{PackageLocation, manifest};
use plinth_core::plugin_system::PluginService;
use plinth_core::utils::fs::absolutize;

use loaders::InertLoader;

/// Plinth: plugin package discovery and hot reload runtime
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Runtime configuration file (JSON, YAML or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Extra package location (directory, package root or URL)
    #[arg(short, long = "package", global = true)]
    packages: Vec<String>,

    /// Plugin type served by a stand-in loader that accepts every plugin
    #[arg(long = "inert-type", global = true)]
    inert_types: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan every package source once and print packages and plugins
    Status {
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Watch package sources and hot-reload plugins until interrupted
    Run,
    /// Parse the manifest of a single package directory
    Inspect {
        /// Package directory
        dir: PathBuf,
    },
}

fn init_logging() {
    if let Err(e) = tracing_log::LogTracer::init() {
        eprintln!("Failed to bridge log records: {}", e);
    }
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install log subscriber: {}", e);
    }
}

fn runtime_builder(args: &CliArgs) -> Result<RuntimeBuilder, plinth_core::KernelError> {
    let mut builder = match &args.config {
        Some(path) => Runtime::from_config_file(path)?,
        None => RuntimeBuilder::new(RuntimeConfig::default()),
    };
    if !args.packages.is_empty() {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let sources = args.packages.iter().map(|location| match PackageLocation::parse(location) {
            PackageLocation::Local(path) => PackageSource::new(absolutize(&cwd, &path).display().to_string()),
            PackageLocation::Remote(url) => PackageSource::new(url),
        });
        builder = builder.add_sources(sources);
    }
    for plugin_type in &args.inert_types {
        builder = builder.loader(plugin_type.clone(), Arc::new(InertLoader::new(plugin_type)));
    }
    Ok(builder)
}

fn print_status(service: &PluginService) {
    let packages = service.list_packages();
    println!("Packages ({}):", packages.len());
    for package in &packages {
        let name = package.name().unwrap_or("<unresolved>");
        match &package.error_message {
            Some(message) => println!("  - {} [{}] {}: {}", name, package.status, package.location, message),
            None => println!("  - {} [{}] {}", name, package.status, package.location),
        }
    }
    let plugins = service.list_plugins();
    println!("Plugins ({}):", plugins.len());
    for plugin in &plugins {
        let mut line = format!("  - {} ({}) [{}]", plugin.name, plugin.plugin_type, plugin.status);
        if !plugin.waiting_on.is_empty() {
            line.push_str(&format!(" waiting on {}", plugin.waiting_on.join(", ")));
        }
        if let Some(message) = &plugin.error_message {
            line.push_str(&format!(": {}", message));
        }
        println!("{}", line);
    }
}

async fn status(runtime: &Runtime, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    runtime.initialize().await?;
    let service = runtime.service();
    if json {
        let snapshot = serde_json::json!({
            "packages": service.list_packages(),
            "plugins": service.list_plugins(),
            "loaders": service.list_loaders(),
        });
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_status(&service);
    }
    runtime.stop().await?;
    Ok(())
}

async fn run(runtime: &Runtime) -> Result<(), Box<dyn std::error::Error>> {
    runtime.initialize().await?;
    runtime.start().await?;
    let service = runtime.service();
    service.subscribe_packages(|event| info!("{}: {}", event.kind.as_str(), event.location));
    println!("Watching {} package source(s); press Ctrl-C to stop", runtime.config().packages.len());
    tokio::signal::ctrl_c().await?;
    println!("Shutting down...");
    runtime.stop().await?;
    Ok(())
}

async fn inspect(dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    match manifest::load_from_dir(dir).await? {
        Some(found) => {
            println!("{}", serde_json::to_string_pretty(&found)?);
            Ok(())
        }
        None => Err(format!("no manifest found in '{}'", dir.display()).into()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();
    let args = CliArgs::parse();

    let result = match &args.command {
        Commands::Inspect { dir } => inspect(dir).await,
        Commands::Status { json } => match runtime_builder(&args).and_then(RuntimeBuilder::build) {
            Ok(runtime) => status(&runtime, *json).await,
            Err(e) => Err(e.into()),
        },
        Commands::Run => match runtime_builder(&args).and_then(RuntimeBuilder::build) {
            Ok(runtime) => run(&runtime).await,
            Err(e) => Err(e.into()),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
