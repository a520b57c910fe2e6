use clap::{Parser, Subcommand};
use extension_host::application::messaging::LoggingMiddleware;
use extension_host::application::services::LoadReport;
use extension_host::infrastructure::plugins::RejectedSources;
use extension_host::{
    CommandContext, DescriptorLoader, ExtensionHost, HostConfig, HostError, ModuleRegistry,
};
use std::io::BufRead;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "extension-host")]
#[command(about = "Dependency-aware extension host", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "extension-host.yaml")]
    config: String,

    /// Extension directory (overrides config)
    #[arg(short, long)]
    dir: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List extension sources and their descriptors
    Discover,
    /// Show the load order and rejected extensions
    Resolve,
    /// Load everything and read commands from stdin
    Run,
    /// Load everything and hot-reload changed sources until Ctrl-C
    Watch,
    /// Show version
    Version,
    /// Generate default config
    InitConfig,
}

fn main() {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Discover => load_config(&cli.config, cli.dir).and_then(|c| discover(&c)),
        Commands::Resolve => load_config(&cli.config, cli.dir).and_then(|c| resolve(&c)),
        Commands::Run => load_config(&cli.config, cli.dir).and_then(|c| run(&c)),
        Commands::Watch => load_config(&cli.config, cli.dir).and_then(|c| watch(&c)),
        Commands::Version => {
            println!("extension-host v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::InitConfig => init_config(),
    };

    if let Err(e) = result {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

fn load_config(path: &str, dir: Option<String>) -> Result<HostConfig, HostError> {
    let mut config = HostConfig::load_or_default(path)?;
    if let Some(dir) = dir {
        config.extensions.directories = vec![dir.into()];
    }
    Ok(config)
}

/// Build a host and register every source under the configured directories
fn start_host(config: &HostConfig) -> Result<(ExtensionHost, DescriptorLoader), HostError> {
    let host = ExtensionHost::with_options(config.host_options()?);
    host.bus().add_middleware(LoggingMiddleware);
    let loader = DescriptorLoader::new(Arc::new(ModuleRegistry::new()))
        .recursive(config.extensions.recursive);

    for dir in &config.extensions.directories {
        let report = loader.discover_directory(&host, dir);
        for error in &report.errors {
            tracing::warn!("{}", error);
        }
        tracing::info!(
            "Discovered {} extensions in {}",
            report.discovered.len(),
            dir.display()
        );
    }
    Ok((host, loader))
}

fn discover(config: &HostConfig) -> Result<(), HostError> {
    let (host, _) = start_host(config)?;
    let extensions = host.extensions();
    if extensions.is_empty() {
        println!("No extensions found");
        return Ok(());
    }

    for extension in extensions {
        println!(
            "{:<24} v{:<10} priority {:<5} {}",
            extension.id, extension.version, extension.priority, extension.location
        );
    }
    Ok(())
}

fn resolve(config: &HostConfig) -> Result<(), HostError> {
    let (host, _) = start_host(config)?;
    let resolution = host.resolve();

    println!("Load order:");
    for (position, id) in resolution.order.iter().enumerate() {
        println!("  {:>3}. {}", position + 1, id);
    }
    if !resolution.errors.is_empty() {
        println!("Rejected:");
        for (id, error) in &resolution.errors {
            println!("  {}: {}", id, error);
        }
    }
    Ok(())
}

fn print_report(report: &LoadReport) {
    for (id, error) in &report.failed {
        tracing::warn!("{} not loaded: {}", id, error);
    }
    println!(
        "Loaded {} extensions ({} failed, {} skipped)",
        report.loaded.len(),
        report.failed.len(),
        report.skipped.len()
    );
}

fn run(config: &HostConfig) -> Result<(), HostError> {
    let (host, loader) = start_host(config)?;
    if config.extensions.auto_load {
        print_report(&host.load_all());
    }

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| HostError::Internal(format!("Failed to start runtime: {}", e)))?;
    if let Some(interval) = config.reload_interval() {
        let host = host.clone();
        let config = config.clone();
        runtime.spawn(async move {
            let mut rejected = RejectedSources::default();
            let mut ticker = tokio::time::interval(interval);
            tracing::info!("Hot reload every {}s", interval.as_secs());
            loop {
                ticker.tick().await;
                poll_changes(&host, &loader, &config, &mut rejected);
            }
        });
    }

    // The console operator holds every permission
    let ctx = CommandContext::for_caller("console")
        .with_permission(extension_host::application::services::builtin::ADMIN_PERMISSION);
    println!("Type {}help for commands, quit to exit", host.commands().prefix());

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.map_err(|e| HostError::Internal(format!("stdin: {}", e)))?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" || line == "exit" {
            break;
        }
        let outcome = host.execute_line(line, &ctx);
        println!("{}", outcome.message);
    }

    runtime.shutdown_background();
    host.unload_all();
    Ok(())
}

fn watch(config: &HostConfig) -> Result<(), HostError> {
    let (host, loader) = start_host(config)?;
    if config.extensions.auto_load {
        print_report(&host.load_all());
    }

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| HostError::Internal(format!("Failed to start runtime: {}", e)))?;

    runtime.block_on(async {
        let Some(interval) = config.reload_interval() else {
            tracing::warn!("Hot reload is disabled; set hot-reload.enabled to watch for changes");
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
            return;
        };

        let mut rejected = RejectedSources::default();
        let mut ticker = tokio::time::interval(interval);
        tracing::info!("Watching for changes every {}s", interval.as_secs());
        loop {
            tokio::select! {
                _ = ticker.tick() => poll_changes(&host, &loader, config, &mut rejected),
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down");
                    break;
                }
            }
        }
    });

    host.unload_all();
    Ok(())
}

fn poll_changes(
    host: &ExtensionHost,
    loader: &DescriptorLoader,
    config: &HostConfig,
    rejected: &mut RejectedSources,
) {
    for result in host.reload_changed() {
        match result {
            Ok(outcome) => tracing::info!(
                "Reloaded {} ({} -> {})",
                outcome.id,
                outcome.previous_version,
                outcome.version
            ),
            Err(e) => tracing::error!("{}", e),
        }
    }

    // Pick up sources added since the last poll
    for dir in &config.extensions.directories {
        let report = loader.discover_new(host, dir, rejected);
        for error in &report.errors {
            tracing::warn!("{}", error);
        }
        if config.extensions.auto_load && !report.discovered.is_empty() {
            print_report(&host.load_all());
        }
    }
}

fn init_config() -> Result<(), HostError> {
    let yaml = HostConfig::default().to_yaml()?;
    println!("{}", yaml);
    println!("\nSave this to extension-host.yaml and adjust as needed.");
    Ok(())
}
