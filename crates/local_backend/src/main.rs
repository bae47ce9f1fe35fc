use std::{
    path::PathBuf,
    process::ExitCode,
    sync::Arc,
};

use clap::{
    Parser,
    Subcommand,
};
use isolate::EngineRegistry;
use local_backend::{
    router,
    LocalAppState,
};
use model::{
    parse_manifest,
    AssetStore,
};
use net_proxy::VirtualNetClient;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "faas-local-backend", about = "Polyglot FaaS host")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Upload a function manifest to the local store.
    Upload { manifest_path: PathBuf },
    /// List stored functions.
    List,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

fn store_root() -> anyhow::Result<PathBuf> {
    Ok(std::env::current_dir()?.join(&*common::knobs::FAAS_STORE_DIR))
}

async fn run(args: Args) -> anyhow::Result<()> {
    match args.command {
        Command::Serve { port } => serve(port).await,
        Command::Upload { manifest_path } => upload(manifest_path),
        Command::List => list(),
    }
}

async fn serve(port: u16) -> anyhow::Result<()> {
    let blocklist_path = std::env::current_dir()?.join(&*common::knobs::EGRESS_BLOCKLIST_FILE);
    let filter = egress::EgressFilter::new(blocklist_path);
    {
        let filter = filter.clone();
        tokio::task::spawn_blocking(move || filter.ensure_loaded()).await?;
    }
    let _reloader = egress::spawn_reloader(filter.clone(), *common::knobs::EGRESS_RELOAD_INTERVAL);

    let net = VirtualNetClient::new(filter)?;
    // Evaluator integrations register their engines here; the host itself
    // ships only the seam.
    let registry = Arc::new(EngineRegistry::new());
    let st = LocalAppState::new(&store_root()?, registry, Some(net));

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    println!("listening on port {port}");
    axum::serve(listener, router(st)).await?;
    Ok(())
}

fn upload(manifest_path: PathBuf) -> anyhow::Result<()> {
    let text = std::fs::read_to_string(&manifest_path)?;
    let manifest = parse_manifest(&text)?;
    let cwd = std::env::current_dir()?;
    let store = AssetStore::new(store_root()?);
    let asset = store.resolve_manifest(&cwd, manifest)?;
    store.save(&asset)?;
    println!("uploaded {} ({})", asset.id, asset.language_id);
    Ok(())
}

fn list() -> anyhow::Result<()> {
    let store = AssetStore::new(store_root()?);
    for asset in store.list()? {
        println!(
            "{}\t{}\t{}",
            asset.id, asset.language_id, asset.function_name,
        );
    }
    Ok(())
}
