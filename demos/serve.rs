//! Serves a directory and an in-memory partitioned resource.
//!
//! ```text
//! cargo run --example serve -- [ROOT] [CONFIG.toml]
//! curl -H 'Range: bytes=0-4,-6' http://localhost:3000/files/fixture.txt
//! curl -H 'Range: bytes=5000-5099' http://localhost:3000/parts/sample.bin
//! ```

use std::sync::Arc;
use std::time::SystemTime;

use axum::routing::{any, get};
use axum::Router;
use tracing_subscriber::EnvFilter;

use axum_partial::service::serve_key;
use axum_partial::{FileSource, MemoryPartitionStore, PartitionedSource, RangeConfig, RangeEngine};

type Partitioned = PartitionedSource<MemoryPartitionStore>;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("axum_partial=debug,info")))
        .init();

    let mut args = std::env::args().skip(1);
    let root = args.next().unwrap_or_else(|| "test".to_string());
    let config = match args.next() {
        Some(path) => RangeConfig::load(&path).unwrap_or_else(|e| panic!("loading {path}: {e}")),
        None => RangeConfig::default(),
    };

    let store = MemoryPartitionStore::new();
    let sample: Vec<u8> = (0..1_000_000u32).map(|i| (i % 251) as u8).collect();
    store.ingest("sample.bin", sample, 64 * 1024, SystemTime::now());

    let files = Arc::new(RangeEngine::new(FileSource::new(&root), config.clone()));
    let parts = Arc::new(RangeEngine::new(PartitionedSource::new(store), config));

    let router = Router::new()
        .route("/", get(|| async { "Hello, World!" }))
        .route("/files/{*key}", any(serve_key::<FileSource>).with_state(files))
        .route("/parts/{*key}", any(serve_key::<Partitioned>).with_state(parts));

    tracing::info!(root = %root, "listening on 0.0.0.0:3000");
    let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
    axum::serve(listener, router).await.unwrap();
}
