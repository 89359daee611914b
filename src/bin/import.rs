use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Instant;
use txgraph::db::open_migrated;
use txgraph::graph::{import_seed, parse_seed};
use txgraph::{Config, SqliteGraphStore};

#[derive(Parser, Debug)]
#[command(name = "import")]
#[command(about = "Load a graph seed (JSON or YAML) into the txgraph database")]
struct Args {
    /// Seed file with `nodes` and `edges`
    seed: PathBuf,

    /// Remove the existing graph before importing
    #[arg(short, long)]
    replace: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", &config.txgraph.log_level),
    )
    .init();

    log::info!("Database path: {}", config.db_path().display());
    let db = open_migrated(config.db_path(), PathBuf::from("migrations"))
        .await
        .context("Failed to open graph database")?;

    let start = Instant::now();
    let seed = parse_seed(&args.seed)
        .with_context(|| format!("Failed to read seed {}", args.seed.display()))?;
    log::info!(
        "Parsed {}: {} nodes, {} edges",
        args.seed.display(),
        seed.nodes.len(),
        seed.edges.len()
    );

    let stats = import_seed(&db, seed, args.replace).await?;
    let (nodes, edges) = SqliteGraphStore::new(db).counts().await?;

    log::info!(
        "Import complete in {:.2?}: wrote {} nodes and {} edges; graph now holds {} nodes and {} edges",
        start.elapsed(),
        stats.nodes,
        stats.edges,
        nodes,
        edges
    );
    Ok(())
}
