use std::sync::Arc;

use anyhow::Result;
use wx_domain::{default_registry, ProcessedRecord, RawRecord};
use wx_ingest::{
    backfill,
    config::AppConfig,
    latest::LatestReading,
    observability,
    pipeline::Pipeline,
    server::{self, AppState},
    sinks::{FanoutSink, FileStore, InfluxSink, RecordSink, ReliableSink},
    sources::SdrStreamSource,
    transform::Enrichment,
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let cfg = AppConfig::load()?;

    // One-shot mode: replay a flat-file archive into InfluxDB and exit.
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => {}
        [flag, path] if flag == "--backfill" => {
            let sink = InfluxSink::new(&cfg.influx.host, &cfg.influx.token, &cfg.influx.database);
            let summary =
                backfill::import_archive(path, &sink, backfill::IMPORT_BATCH_SIZE).await?;
            tracing::info!(
                records = summary.records,
                batches = summary.batches,
                "backfill finished"
            );
            return Ok(());
        }
        _ => anyhow::bail!("usage: wx-ingest [--backfill <archive>]"),
    }

    let metrics = if cfg.metrics.enabled {
        Some(observability::init_metrics()?)
    } else {
        None
    };

    let latest = LatestReading::new();
    let influx = InfluxSink::new(&cfg.influx.host, &cfg.influx.token, &cfg.influx.database);

    // Stream persistence: every batch goes to the flat-file archive and,
    // through the reliability wrapper, to InfluxDB.
    let reliable = ReliableSink::new(
        influx.clone(),
        FileStore::new(cfg.store.spill_path()),
        cfg.sink.max_retries,
        cfg.sink.retry_backoff(),
        cfg.sink.max_queued_batches,
    );
    let sink = FanoutSink::new(
        cfg.sink.batch_size,
        vec![
            Arc::new(FileStore::new(cfg.store.path.clone())) as Arc<dyn RecordSink>,
            Arc::new(reliable),
        ],
        latest.clone(),
    );
    let source = SdrStreamSource::new(
        cfg.sdr.stream_url.clone(),
        cfg.sdr.max_retries,
        cfg.sdr.retry_backoff(),
    );
    let pipeline: Pipeline<_, RawRecord, ProcessedRecord, _> = Pipeline {
        source,
        stage: Arc::new(Enrichment),
        sink,
    };

    // Pushed records take the synchronous path so the sensor sees real
    // write failures in the response status.
    let state = AppState {
        registry: default_registry(),
        latest,
        push_sink: Arc::new(influx),
        store_path: cfg.store.path.clone(),
        metrics,
    };
    let listener = tokio::net::TcpListener::bind(&cfg.http.bind_addr).await?;
    tracing::info!(addr = %cfg.http.bind_addr, "http server listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, server::router(state).into_make_service()).await {
            tracing::error!(error = %e, "http server error");
        }
    });

    tokio::select! {
        result = pipeline.run() => {
            result?;
            anyhow::bail!("bridge stream ended");
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, exiting");
        }
    }
    Ok(())
}

/// Resolves when SIGINT or SIGTERM arrives.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
