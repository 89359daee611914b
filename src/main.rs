use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use txgraph::cache::CachedGraphStore;
use txgraph::db::{migrate, open_migrated, Db};
use txgraph::error::TxgraphError;
use txgraph::hierarchy::HierarchyAssembler;
use txgraph::report::build_report;
use txgraph::server::{HttpServer, ResolveResponse, SharedEngine, SharedGraph, SharedOracle};
use txgraph::{Config, OpenAIOracle, SqliteGraphStore, TraversalEngine};

#[derive(Parser, Debug)]
#[command(name = "txgraph")]
#[command(version, about = "Oracle-guided treatment consideration graph navigator")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply migrations and verify the graph schema (default)
    Verify,
    /// Resolve considerations and print the treatment report
    Resolve {
        /// Free-text considerations extracted from a request
        #[arg(required = true)]
        considerations: Vec<String>,

        /// Print the mapping and report as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// Serve the HTTP API
    Serve {
        /// Override http_server.port
        #[arg(short, long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::load()?;

    env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", &config.txgraph.log_level),
    )
    .init();

    match cli.command.unwrap_or(Command::Verify) {
        Command::Verify => run_schema_verification(&config).await,
        Command::Resolve {
            considerations,
            json,
        } => run_resolve(&config, &considerations, json).await,
        Command::Serve { port } => run_http_server(&config, port).await,
    }
}

async fn open_graph_db(config: &Config) -> Result<Db> {
    let db = open_migrated(config.db_path(), PathBuf::from("migrations"))
        .await
        .with_context(|| format!("Failed to open graph database {}", config.db_path().display()))?;
    log::info!("Database initialized: {}", config.db_path().display());
    Ok(db)
}

/// Graph store, optionally behind the traversal cache.
fn build_graph(config: &Config, db: Db) -> SharedGraph {
    let store = SqliteGraphStore::new(db);
    match config.traversal.cache_capacity {
        0 => Arc::new(store),
        capacity => Arc::new(CachedGraphStore::new(store, capacity)),
    }
}

/// Refuse to start when a configured root is absent from the graph.
async fn check_roots(config: &Config, db: &Db) -> Result<()> {
    let missing = SqliteGraphStore::new(db.clone())
        .missing_roots(&config.traversal.roots)
        .await?;
    if !missing.is_empty() {
        anyhow::bail!(
            "traversal.roots not found as CONSIDERATION nodes: {}",
            missing.join(", ")
        );
    }
    Ok(())
}

fn build_engine(config: &Config, db: Db) -> Result<SharedEngine> {
    let oracle: SharedOracle = Arc::new(OpenAIOracle::from_config(&config.oracle)?);
    Ok(TraversalEngine::from_config(build_graph(config, db), oracle, &config.traversal))
}

async fn run_resolve(config: &Config, considerations: &[String], json: bool) -> Result<()> {
    let db = open_graph_db(config).await?;
    check_roots(config, &db).await?;
    let engine = build_engine(config, db)?;

    let resolution = engine.resolve(considerations).await?;
    let assembler = HierarchyAssembler::new(Arc::clone(engine.graph()));
    let report = build_report(&assembler, &resolution).await?;

    if json {
        let text = report.render_text();
        let response = ResolveResponse {
            considerations: resolution,
            report,
            text,
        };
        println!("{}", serde_json::to_string_pretty(&response)?);
    } else {
        println!("{}", report.render_text());
    }
    Ok(())
}

async fn run_http_server(config: &Config, port: Option<u16>) -> Result<()> {
    log::info!("Starting txgraph HTTP server v{}", env!("CARGO_PKG_VERSION"));
    let db = open_graph_db(config).await?;
    check_roots(config, &db).await?;
    let engine = build_engine(config, db)?;

    let server = HttpServer::new(engine, config.http_server.allowed_origins.clone());
    server.run(port.unwrap_or(config.http_server.port)).await?;
    Ok(())
}

/// Run database schema verification
async fn run_schema_verification(config: &Config) -> Result<()> {
    log::info!("Starting txgraph v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Database path: {}", config.db_path().display());
    log::info!("Decide model: {}", config.oracle.decide_model);
    log::info!("Select model: {}", config.oracle.select_model);
    log::info!(
        "Traversal: {} roots, max {} turns, deadline {:?}",
        config.traversal.roots.len(),
        config.traversal.max_turns,
        config.deadline()
    );

    let db = open_graph_db(config).await?;
    verify_database_schema(&db).await?;

    let (nodes, edges) = SqliteGraphStore::new(db).counts().await?;
    if nodes == 0 {
        log::warn!("Graph is empty; load a seed with the import binary");
    } else {
        log::info!("Graph holds {} nodes and {} edges", nodes, edges);
    }
    Ok(())
}

/// Verify that all expected database objects exist
async fn verify_database_schema(db: &Db) -> Result<()> {
    db.with_connection(|conn| {
        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
        let tables: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

        let mut all_tables_exist = true;
        for table in ["edges", "nodes", "schema_migrations"] {
            if tables.iter().any(|t| t == table) {
                log::debug!("✓ Table exists: {}", table);
            } else {
                log::error!("Missing table: {}", table);
                all_tables_exist = false;
            }
        }
        if !all_tables_exist {
            return Err(TxgraphError::Config("Not all required tables exist".to_string()));
        }

        let applied = migrate::get_applied_migrations(conn)?;
        if applied.len() < 2 {
            return Err(TxgraphError::Config(format!(
                "Expected at least 2 migrations, found {}",
                applied.len()
            )));
        }
        log::debug!("✓ {} migrations applied", applied.len());

        let mut stmt = conn.prepare("SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%' ORDER BY name")?;
        let indexes: Vec<String> = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;
        for index_name in ["idx_edges_target_relation", "idx_edges_source_relation", "idx_nodes_treatment_type"] {
            if indexes.iter().any(|i| i == index_name) {
                log::debug!("✓ Index exists: {}", index_name);
            } else {
                log::warn!("Index not found: {} (migration 002 may not be applied)", index_name);
            }
        }

        let journal_mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        if journal_mode.to_uppercase() != "WAL" {
            return Err(TxgraphError::Config(format!("Journal mode is not WAL: {}", journal_mode)));
        }

        let foreign_keys: i32 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0))?;
        if foreign_keys != 1 {
            return Err(TxgraphError::Config("Foreign keys not enabled".to_string()));
        }

        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        if integrity != "ok" {
            return Err(TxgraphError::Config(format!("Database integrity check failed: {}", integrity)));
        }
        log::info!("✓ Database integrity: OK");

        Ok(())
    })
    .await?;

    log::info!("✓ Database schema verification complete");
    Ok(())
}
