use std::error::Error;
use std::path::Path;

use tracing_subscriber::EnvFilter;

use warden::cli::{parse_args, Cli, Commands};
use warden::manifest::ProcessManifest;
use warden::registry::PluginRegistry;
use warden::supervisor::Supervisor;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let Cli { command } = parse_args();
    match command {
        Commands::Validate { manifest } => {
            load_manifest(&manifest)?;
            println!("{} is valid", manifest.display());
            Ok(())
        }
        Commands::Start { manifest } => run(&manifest),
    }
}

fn load_manifest(path: &Path) -> Result<ProcessManifest, Box<dyn Error>> {
    let is_json = path.extension().and_then(|ext| ext.to_str()) == Some("json");
    let manifest = if is_json {
        ProcessManifest::load_json(path)?
    } else {
        ProcessManifest::load_yaml(path)?
    };
    Ok(manifest)
}

fn run(path: &Path) -> Result<(), Box<dyn Error>> {
    let manifest = load_manifest(path)?;
    let (supervisor, handle) = Supervisor::new(manifest, PluginRegistry::new());

    let shutdown_handle = handle.clone();
    ctrlc::set_handler(move || {
        tracing::info!("received interrupt; shutting down");
        shutdown_handle.shutdown();
    })?;

    supervisor.run()?;
    Ok(())
}
