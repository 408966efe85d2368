use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use sessium::config::EngineConfig;
use sessium::engine::StandardEngine;
use sessium::identity::{MemorySessionSource, Principal};
use sessium::store::MemoryProfileStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    fmt().with_env_filter(filter).init();

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    let cfg = EngineConfig::from_env();
    info!(
        target: "sessium",
        "sessium starting: RUST_LOG='{}', safety_timeout={:?}, probe_timeout={:?}, cache_key='{}'",
        rust_log, cfg.safety_timeout, cfg.probe_timeout, cfg.cache_key
    );

    // Wire the in-memory collaborators and run one reconciliation pass.
    let source = Arc::new(MemorySessionSource::new());
    let store = Arc::new(MemoryProfileStore::new());
    let engine = StandardEngine::start(source.clone(), store, cfg);

    let mut view = engine.subscribe();
    while view.borrow().loading {
        view.changed().await?;
    }
    info!(target: "sessium", "initial reconciliation settled: {:?}", engine.state());

    source.issue(
        Principal {
            id: "demo".into(),
            email: "demo@sessium.local".into(),
        },
        false,
    );
    loop {
        view.changed().await?;
        let state = view.borrow().clone();
        if !state.loading && state.identity.is_some() {
            info!(target: "sessium", "signed in: {:?}", state.identity);
            break;
        }
    }

    engine.dispose();
    Ok(())
}
