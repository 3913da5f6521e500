//! `kg`: a thin operator/developer entry point that exercises the
//! ingest -> shard -> lookup/traversal data plane end to end against
//! local-disk stand-ins for the blob store and embedded SQL engine.
//! Not a server: no MCP dispatch, SPARQL/text front-end, HTTP router, or
//! auth lives here.

mod disk_store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kg_ingest::{ImportDriver, ImportDriverConfig};
use kg_manifest::{ManifestStore, ManifestStoreConfig, R2Manifest};
use kg_model::{namespace_of, path_transform, EntityId, Namespace, Triple, TypedObject, TxId};
use kg_object_store::ObjectStore;
use kg_shard::{GraphLookup, TraversalExecutor};
use serde::Deserialize;

use disk_store::DiskObjectStore;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the local blob store, checkpoints, and index files.
    #[clap(long, env = "KG_DATA_DIR", default_value = "./kg-data")]
    data_dir: PathBuf,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream a JSONL triple file through the resumable import pipeline.
    Ingest {
        /// Path to a JSONL file; each line is `{"subject","predicate","object","timestamp"}`.
        #[clap(long)]
        input: PathBuf,
        /// An entity id used only to derive the target namespace.
        #[clap(long)]
        seed_entity: String,
        #[clap(long, default_value = "cli-import")]
        job_id: String,
        #[clap(long, default_value_t = 10_000)]
        batch_size: usize,
        #[clap(long, default_value_t = 5_000)]
        checkpoint_every_lines: u64,
    },
    /// Resolve one entity by id via the V2 fast-path lookup.
    Lookup {
        entity_id: String,
    },
    /// Capped BFS traversal starting from one entity.
    Traverse {
        entity_id: String,
        #[clap(long)]
        depth: Option<u32>,
    },
    /// Print chunk-store and manifest stats for a namespace.
    Stats {
        /// Any entity id in the namespace of interest.
        entity_id: String,
    },
}

fn main() -> Result<(), anyhow::Error> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting tracing default failed");

    let args = Args::parse();
    tracing::info!(?args, "started");

    let runtime = tokio::runtime::Builder::new_multi_thread().enable_all().build()?;
    let task = runtime.spawn(async_main(args));
    let result = runtime.block_on(task);
    runtime.shutdown_timeout(std::time::Duration::from_secs(5));
    result?
}

async fn async_main(args: Args) -> Result<(), anyhow::Error> {
    std::fs::create_dir_all(&args.data_dir).context("creating data dir")?;
    let store = Arc::new(DiskObjectStore::new(args.data_dir.join("blobs")));

    match args.command {
        Command::Ingest { input, seed_entity, job_id, batch_size, checkpoint_every_lines } => {
            run_ingest(store, &args.data_dir, input, seed_entity, job_id, batch_size, checkpoint_every_lines).await
        }
        Command::Lookup { entity_id } => run_lookup(store, &args.data_dir, entity_id).await,
        Command::Traverse { entity_id, depth } => run_traverse(store, &args.data_dir, entity_id, depth).await,
        Command::Stats { entity_id } => run_stats(store, entity_id).await,
    }
}

/// One line of the input JSONL file. `object` reuses `TypedObject`'s own
/// `{type, value}` serde representation directly.
#[derive(Debug, Deserialize)]
struct InputRow {
    subject: String,
    predicate: String,
    object: TypedObject,
    timestamp: u64,
}

fn parse_line(line: &str) -> Vec<Triple> {
    let Ok(row) = serde_json::from_str::<InputRow>(line) else {
        tracing::warn!(line, "skipping line that does not parse as an input row");
        return Vec::new();
    };
    let Ok(subject) = row.subject.parse::<EntityId>() else {
        return Vec::new();
    };
    let Ok(predicate) = row.predicate.parse() else {
        return Vec::new();
    };
    vec![Triple {
        subject,
        predicate,
        object: row.object,
        timestamp: row.timestamp,
        tx_id: TxId::from_parts(row.timestamp, 0),
    }]
}

async fn run_ingest(
    store: Arc<DiskObjectStore>,
    data_dir: &std::path::Path,
    input: PathBuf,
    seed_entity: String,
    job_id: String,
    batch_size: usize,
    checkpoint_every_lines: u64,
) -> Result<(), anyhow::Error> {
    let seed: EntityId = seed_entity.parse().map_err(|e| anyhow::anyhow!("invalid --seed-entity: {e}"))?;
    let namespace = namespace_of(&seed);

    let kv_conn = rusqlite::Connection::open(data_dir.join("checkpoints.sqlite"))?;
    let kv = Arc::new(kg_durable_kv::SqliteDurableKv::open(kv_conn)?);

    let config = ImportDriverConfig {
        job_id,
        source_url: input.display().to_string(),
        checkpoint_every_lines,
        writer: kg_ingest::WriterConfig { batch_size, ..Default::default() },
    };

    let mut driver = ImportDriver::resume(config, store.clone(), namespace.clone(), kv).await?;
    let bytes = tokio::fs::read(&input).await.context("reading input file")?;
    driver.process_chunk(&bytes, parse_line).await?;
    driver.flush_remaining_lines(parse_line).await?;
    let totals = driver.finalize().await?;

    tracing::info!(
        triples_written = totals.triples_written,
        chunks_uploaded = totals.chunks_uploaded,
        bytes_uploaded = totals.bytes_uploaded,
        "ingest complete"
    );

    write_manifest(&*store, &namespace, &driver).await
}

/// Builds an `R2Manifest` directly from the writer's chunk infos and running
/// combined bloom, so the freshly-ingested namespace is immediately
/// lookupable without a separate sync step.
async fn write_manifest(
    store: &DiskObjectStore,
    namespace: &Namespace,
    driver: &ImportDriver<DiskObjectStore, kg_durable_kv::SqliteDurableKv>,
) -> Result<(), anyhow::Error> {
    let state = driver.writer_state();
    let chunks = state
        .chunk_infos
        .iter()
        .map(|c| kg_manifest::R2ChunkEntry {
            id: c.id.clone(),
            path: c.path.clone(),
            triple_count: c.triple_count,
            min_time: c.min_time,
            max_time: c.max_time,
            bytes: c.bytes,
            bloom: c.bloom.clone(),
        })
        .collect();

    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
    let manifest = R2Manifest {
        namespace: namespace.as_str().to_string(),
        version: now.to_string(),
        chunks,
        combined_bloom: state.bloom_state.clone(),
        created_at: now,
    };

    let key = format!("{}/_manifest.json", path_transform(namespace.as_str()));
    let bytes = serde_json::to_vec(&manifest)?;
    store.put(&key, bytes.into(), Some("application/json".to_string())).await?;
    println!("wrote manifest for namespace {namespace} ({} chunks)", manifest.chunks.len());
    Ok(())
}

/// Open the shard-local manifest store (C7), backed by its own `rusqlite`
/// connection alongside the checkpoint store's.
fn open_manifest_store(
    data_dir: &std::path::Path,
) -> Result<Arc<ManifestStore<kg_durable_kv::SqliteDurableKv>>, anyhow::Error> {
    let conn = rusqlite::Connection::open(data_dir.join("manifest.sqlite"))?;
    let kv = Arc::new(kg_durable_kv::SqliteDurableKv::open(conn)?);
    Ok(Arc::new(ManifestStore::new(kv, ManifestStoreConfig::default())))
}

async fn run_lookup(store: Arc<DiskObjectStore>, data_dir: &std::path::Path, entity_id: String) -> Result<(), anyhow::Error> {
    let id: EntityId = entity_id.parse().map_err(|e| anyhow::anyhow!("invalid entity id: {e}"))?;
    let manifest_store = open_manifest_store(data_dir)?;
    let lookup = GraphLookup::new(store, manifest_store);
    let (entity, stats) = lookup.lookup_v2(&id).await?;
    match entity {
        Some(entity) => println!("{entity:#?}"),
        None => println!("not found"),
    }
    tracing::debug!(?stats, "lookup stats");
    Ok(())
}

async fn run_traverse(
    store: Arc<DiskObjectStore>,
    data_dir: &std::path::Path,
    entity_id: String,
    depth: Option<u32>,
) -> Result<(), anyhow::Error> {
    let id: EntityId = entity_id.parse().map_err(|e| anyhow::anyhow!("invalid entity id: {e}"))?;
    let manifest_store = open_manifest_store(data_dir)?;
    let lookup = Arc::new(GraphLookup::new(store, manifest_store));
    let executor = TraversalExecutor::new(lookup);
    let result = executor.traverse(&id, depth).await?;
    println!("{result:#?}");
    Ok(())
}

async fn run_stats(store: Arc<DiskObjectStore>, entity_id: String) -> Result<(), anyhow::Error> {
    let id: EntityId = entity_id.parse().map_err(|e| anyhow::anyhow!("invalid entity id: {e}"))?;
    let namespace = namespace_of(&id);
    let key = format!("{}/_manifest.json", path_transform(namespace.as_str()));
    match store.get(&key, None).await? {
        Some((_, bytes)) => {
            let manifest: R2Manifest = serde_json::from_slice(&bytes)?;
            println!(
                "namespace {} | version {} | {} chunks | created_at {}",
                manifest.namespace,
                manifest.version,
                manifest.chunks.len(),
                manifest.created_at
            );
            let total_triples: u64 = manifest.chunks.iter().map(|c| c.triple_count as u64).sum();
            let total_bytes: u64 = manifest.chunks.iter().map(|c| c.bytes).sum();
            println!("{total_triples} triples across {total_bytes} bytes");
        }
        None => println!("no manifest found for namespace {namespace}"),
    }
    Ok(())
}
