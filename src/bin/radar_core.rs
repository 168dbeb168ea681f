//! Composition root. Loads configuration, builds every component, wires
//! the query facade and HTTP router, and supervises the background
//! tasks that keep the live world up to date — the enrichment poller,
//! the AIS consumer, its staleness janitor, the historical-store
//! cleanup janitor, and the semantic rebuild ticker.
//!
//! Modeled on the teacher's `commands/run.rs`: metrics installed before
//! anything else can emit through them, an `InstanceLock` acquired up
//! front, supervised tasks spawned with their own tracing span, and a
//! single `ctrl_c`-driven shutdown that signals every task and waits
//! for the HTTP server to close before exiting.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Instrument};
use tracing_subscriber::EnvFilter;

use radar_core::adsb_poller::EnrichmentPoller;
use radar_core::ais::AisConsumer;
use radar_core::airspace::AirspaceIndex;
use radar_core::coastline::CoastlineIndex;
use radar_core::config::RadarConfig;
use radar_core::facade::QueryFacade;
use radar_core::instance_lock::InstanceLock;
use radar_core::log_format::TargetFirstFormat;
use radar_core::metar::MetarIngester;
use radar_core::notam::NotamIngester;
use radar_core::registry::AircraftRegistry;
use radar_core::semantic::{Embedder, HashingEmbedder, SemanticIndex, SemanticPaths, SourceKind};
use radar_core::ssr::SsrClassifier;
use radar_core::store::{self, HistoricalStore};
use radar_core::weather::WeatherIngester;
use radar_core::web::{self, AppState};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .event_format(TargetFirstFormat)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Arc::new(RadarConfig::from_env());

    let _instance_lock = match InstanceLock::new("radar-core") {
        Ok(lock) => lock,
        Err(e) => {
            eprintln!("Another instance is already running: {e}");
            std::process::exit(1);
        }
    };

    let metrics_handle = radar_core::metrics::install();
    tokio::spawn(
        radar_core::metrics::serve(metrics_handle, config.metrics_port)
            .instrument(tracing::info_span!("metrics_server")),
    );

    info!("Loading airspace index from {}", config.airspace_dir);
    let airspace = Arc::new(AirspaceIndex::load(Path::new(&config.airspace_dir)));
    info!("Airspace index ready with {} zones", airspace.zone_count());

    info!("Loading SSR classifier from {}", config.ssr_file);
    let ssr = Arc::new(SsrClassifier::load(Path::new(&config.ssr_file)));
    info!("SSR classifier ready with {} codes", ssr.len());

    info!("Loading coastline index from {}", config.coastline_file);
    let coastline = Arc::new(CoastlineIndex::load(Path::new(&config.coastline_file)));
    info!("Coastline index ready with {} points", coastline.len());

    info!("Opening aircraft registry at {}", config.registry_path);
    let registry_db_path = PathBuf::from(format!("{}.sled", config.registry_path));
    let registry = match AircraftRegistry::open(&registry_db_path, Path::new(&config.registry_path)) {
        Ok(r) => Arc::new(r),
        Err(e) => {
            eprintln!("Failed to open aircraft registry at {}: {e}", registry_db_path.display());
            std::process::exit(1);
        }
    };
    info!("Aircraft registry ready with {} entries", registry.len());

    info!("Opening historical store at {}", config.history_db_path);
    let store = match HistoricalStore::open(Path::new(&config.history_db_path)) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            eprintln!("Failed to open historical store at {}: {e}", config.history_db_path);
            std::process::exit(1);
        }
    };

    let semantic_paths = Arc::new(SemanticPaths {
        vectors: PathBuf::from(&config.semantic_index_path),
        metadata: PathBuf::from(&config.semantic_metadata_path),
    });
    let semantic = Arc::new(
        SemanticIndex::load(config.embed_dim, &semantic_paths.vectors, &semantic_paths.metadata)
            .unwrap_or_else(|| SemanticIndex::new(config.embed_dim)),
    );
    let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(config.embed_dim));

    let ais = Arc::new(AisConsumer::new());
    let notam = Arc::new(NotamIngester::new(config.notam_feed_url.clone(), Duration::from_secs(config.notam_ttl_s)));
    let metar = Arc::new(MetarIngester::default_chain(Duration::from_secs(config.metar_ttl_s)));
    let weather = Arc::new(WeatherIngester::new(config.weather_feed_url.clone(), Duration::from_secs(config.weather_ttl_s)));

    let facade = Arc::new(QueryFacade {
        airspace: airspace.clone(),
        registry: registry.clone(),
        ais: ais.clone(),
        store: store.clone(),
        semantic: semantic.clone(),
        embedder: embedder.clone(),
        notam: notam.clone(),
        metar: metar.clone(),
        weather: weather.clone(),
        coastline: coastline.clone(),
        ssr: ssr.clone(),
    });

    let (rebuild_tx, mut rebuild_rx) = tokio::sync::mpsc::channel::<()>(1);

    let poller = Arc::new(EnrichmentPoller::new(config.clone(), airspace.clone(), ssr.clone(), registry.clone(), store.clone()));

    let state = AppState {
        facade: facade.clone(),
        ais: ais.clone(),
        semantic: semantic.clone(),
        poller: poller.clone(),
        rebuild_tx,
        started_at: Instant::now(),
    };

    let shutdown = CancellationToken::new();

    // Aircraft enrichment poller (C5).
    {
        let poller = poller.clone();
        let interval = config.poll_interval();
        let shutdown = shutdown.clone();
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            let processed = poller.tick().await;
                            if processed > 0 {
                                tracing::debug!("Enrichment poll processed {processed} aircraft");
                            }
                        }
                    }
                }
                info!("Enrichment poller stopped");
            }
            .instrument(tracing::info_span!("enrichment_poller")),
        );
    }

    // AIS consumer (C6): the long-lived WebSocket loop runs until
    // `request_stop` is called, which the shutdown handler below does.
    {
        let ais = ais.clone();
        let config = config.clone();
        tokio::spawn(
            async move {
                ais.run(&config.ais_url, &config.ais_api_key, config.ais_bounds).await;
                info!("AIS consumer stopped");
            }
            .instrument(tracing::info_span!("ais_consumer")),
        );
    }

    // AIS staleness janitor.
    {
        let ais = ais.clone();
        let vessel_ttl_s = config.vessel_ttl_s as i64;
        let shutdown = shutdown.clone();
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(60));
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {
                            let evicted = ais.evict_stale(vessel_ttl_s);
                            if evicted > 0 {
                                tracing::debug!("Evicted {evicted} stale vessels");
                            }
                            metrics::gauge!(radar_core::metrics::AIS_VESSELS_TRACKED).set(ais.vessel_count() as f64);
                        }
                    }
                }
            }
            .instrument(tracing::info_span!("ais_janitor")),
        );
    }

    // Historical store cleanup + lost-contact janitor (spec.md §4.8).
    {
        let store = store.clone();
        let config = config.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(config.cleanup_interval());
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {}
                    }

                    match store::report_lost_contact(&store, config.vessel_ttl_s as i64 * 3) {
                        Ok(events) if !events.is_empty() => info!("Lost-contact janitor emitted {} events", events.len()),
                        Ok(_) => {}
                        Err(e) => warn!("Lost-contact sweep failed: {e}"),
                    }

                    match store.cleanup(config.retention_days) {
                        Ok(rows) if rows > 0 => {
                            metrics::counter!(radar_core::metrics::HISTORY_CLEANUP_ROWS_TOTAL).increment(rows as u64);
                            info!("Historical cleanup removed {rows} contacts older than {} days", config.retention_days);
                        }
                        Ok(_) => {}
                        Err(e) => warn!("Historical cleanup failed: {e}"),
                    }
                }
            }
            .instrument(tracing::info_span!("history_janitor")),
        );
    }

    // Semantic rebuild ticker (C9): fires on its own cadence or on
    // demand via the `/rebuild` endpoint's channel.
    {
        let semantic = semantic.clone();
        let embedder = embedder.clone();
        let store = store.clone();
        let ais = ais.clone();
        let notam = notam.clone();
        let weather = weather.clone();
        let config = config.clone();
        let semantic_paths = semantic_paths.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(config.rebuild_interval());
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => {}
                        _ = rebuild_rx.recv() => {}
                    }

                    let start = Instant::now();
                    let summaries = build_summaries(&store, &ais, &notam, &weather).await;
                    let count = summaries.len();
                    semantic.rebuild(embedder.as_ref(), summaries).await;
                    metrics::histogram!(radar_core::metrics::REBUILD_DURATION_SECONDS).record(start.elapsed().as_secs_f64());

                    if let Err(e) = semantic.persist(&semantic_paths.vectors, &semantic_paths.metadata) {
                        warn!("Failed to persist semantic index: {e}");
                    } else {
                        info!("Semantic index rebuilt and persisted ({count} entries)");
                    }
                }
            }
            .instrument(tracing::info_span!("semantic_rebuild")),
        );
    }

    let http_interface = config.http_interface.clone();
    let http_port = config.http_port;
    let server_shutdown = shutdown.clone();
    let server_task = tokio::spawn(
        async move {
            let listener = match tokio::net::TcpListener::bind(format!("{http_interface}:{http_port}")).await {
                Ok(l) => l,
                Err(e) => {
                    eprintln!("Failed to bind HTTP server on {http_interface}:{http_port}: {e}");
                    std::process::exit(1);
                }
            };
            info!("HTTP API listening on http://{http_interface}:{http_port}");
            let result = axum::serve(listener, web::router(state))
                .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
                .await;
            if let Err(e) = result {
                warn!("HTTP server exited with error: {e}");
            }
        }
        .instrument(tracing::info_span!("http_server")),
    );

    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal, stopping background tasks...");
            ais.request_stop();
            shutdown.cancel();
        }
        Err(e) => eprintln!("Unable to listen for shutdown signal: {e}"),
    }

    let _ = server_task.await;
    info!("Graceful shutdown complete");
}

/// Builds the natural-language corpus the semantic rebuild embeds,
/// drawing on the live aircraft, vessel, weather and NOTAM state (spec.md
/// §4.9). Best-effort: a source that's currently unavailable simply
/// contributes nothing to this cycle rather than aborting the rebuild.
async fn build_summaries(
    store: &HistoricalStore,
    ais: &AisConsumer,
    notam: &NotamIngester,
    weather: &WeatherIngester,
) -> Vec<(String, SourceKind)> {
    let mut summaries = Vec::new();

    match store.active(15) {
        Ok(active) => {
            for a in active {
                let callsign = a.callsign.as_deref().unwrap_or("unknown callsign");
                let position = match (a.lat, a.lon) {
                    (Some(lat), Some(lon)) => format!("near {lat:.3},{lon:.3}"),
                    _ => "with no recent position".to_string(),
                };
                let altitude = a.alt.map(|alt| format!(" at {alt:.0} ft")).unwrap_or_default();
                summaries.push((
                    format!("Aircraft {} ({callsign}) {position}{altitude}", a.hex),
                    SourceKind::Aircraft,
                ));
            }
        }
        Err(e) => warn!("Could not read active aircraft for semantic rebuild: {e}"),
    }

    // `in_range` is the only spatial primitive the consumer exposes;
    // a near-antipodal radius approximates "every tracked vessel".
    for (vessel, _) in ais.in_range(0.0, 0.0, 20_000.0) {
        let name = vessel.name.as_deref().unwrap_or("unnamed vessel");
        let position = match (vessel.lat, vessel.lon) {
            (Some(lat), Some(lon)) => format!("near {lat:.3},{lon:.3}"),
            _ => "with no recent position".to_string(),
        };
        summaries.push((format!("Vessel {} ({name}) {position}", vessel.mmsi), SourceKind::Other));
    }

    match weather.all().await {
        Ok(cells) => {
            for cell in cells {
                summaries.push((
                    format!("Weather cell {} ({}) near {:.3},{:.3}", cell.id, cell.condition, cell.lat, cell.lon),
                    SourceKind::Weather,
                ));
            }
        }
        Err(e) => warn!("Could not fetch weather for semantic rebuild: {e}"),
    }

    match notam.all().await {
        Ok(notams) => {
            for n in notams {
                let position = match (n.lat, n.lon) {
                    (Some(lat), Some(lon)) => format!(" near {lat:.3},{lon:.3}"),
                    _ => String::new(),
                };
                summaries.push((
                    format!("NOTAM {} ({:?} {}){position}: {}", n.id, n.priority, n.category, n.description),
                    SourceKind::Notam,
                ));
            }
        }
        Err(e) => warn!("Could not fetch NOTAMs for semantic rebuild: {e}"),
    }

    summaries
}
