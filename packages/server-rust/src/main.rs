//! Tilefall server binary: wire everything together and run.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tilefall_core::clock::SystemClock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tilefall_server::cache::MemoryCache;
use tilefall_server::db::{DurableStore, NullStore, PgStore};
use tilefall_server::maps::{MapManager, SpawnPoint, WorldMap};
use tilefall_server::network::NetworkModule;
use tilefall_server::ai::EntityAiTicker;
use tilefall_server::{ServerArgs, ServerContext, World};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

/// Built-in fallback map so a bare server is playable without map files:
/// an open field with a couple of goblin camps.
fn builtin_maps(default_map: &str) -> MapManager {
    let mut map = WorldMap::open_field(default_map, 64, 64);
    map.set_spawn(10, 10);
    map.spawn_points = vec![
        SpawnPoint {
            id: 1,
            entity: "GOBLIN".to_string(),
            x: 20,
            y: 20,
            wander_radius: 3,
            aggro_override: None,
            disengage_override: None,
        },
        SpawnPoint {
            id: 2,
            entity: "GIANT_RAT".to_string(),
            x: 40,
            y: 30,
            wander_radius: 5,
            aggro_override: None,
            disengage_override: None,
        },
    ];
    let mut maps = MapManager::new();
    maps.insert(map);
    maps
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = ServerArgs::parse();
    init_tracing(args.log_json);

    if let Some(port) = args.metrics_port {
        let addr: std::net::SocketAddr = ([0, 0, 0, 0], port).into();
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!(%addr, "prometheus exporter listening");
    }

    // Maps.
    let mut maps = MapManager::new();
    match &args.maps_dir {
        Some(dir) => {
            let loaded = maps.load_dir(dir)?;
            anyhow::ensure!(loaded > 0, "no map files found in {}", dir.display());
        }
        None => {
            warn!("no --maps-dir given; using the built-in map");
            maps = builtin_maps(&args.default_map);
        }
    }

    // Durable store.
    let store: Arc<dyn DurableStore> = match &args.database_url {
        Some(url) => {
            let store = PgStore::connect(url, args.db_max_connections).await?;
            info!("connected to the durable store");
            Arc::new(store)
        }
        None => {
            warn!("no DATABASE_URL; running cache-only, nothing will persist");
            Arc::new(NullStore)
        }
    };

    let world = World::new(
        Arc::new(MemoryCache::new()),
        store,
        Arc::new(SystemClock),
        Arc::new(maps),
        args.game_settings(),
        args.rng_seed,
    );

    // Restore still-live ground items, then populate the spawn points.
    let restored = world.ground_items.hydrate_from_store().await?;
    if restored > 0 {
        info!(restored, "ground items restored from the durable store");
    }
    for map in world.maps.iter() {
        for point in &map.spawn_points {
            let Some(def) = world.reference.entity_by_name(&point.entity) else {
                warn!(entity = %point.entity, "spawn point references unknown entity");
                continue;
            };
            world
                .entities
                .spawn(def, &map.id, point.x, point.y, point.id, point.wander_radius, None)
                .await?;
        }
    }

    // Network.
    let mut network = NetworkModule::new(args.network_config());
    network.start().await?;
    let shutdown_ctrl = network.shutdown_controller();
    let registry = network.registry();

    let ctx = ServerContext::new(
        Arc::clone(&world),
        registry,
        &args.jwt_secret,
        args.default_map.clone(),
    );

    // Background tasks: AI tick and periodic batch sync.
    let ticker = EntityAiTicker::new(
        Arc::clone(&world),
        Arc::clone(&ctx.broadcaster),
        args.tick_interval(),
    );
    let ticker_task = tokio::spawn(ticker.run(shutdown_ctrl.subscribe()));

    let sync_task = {
        let world = Arc::clone(&world);
        let mut shutdown = shutdown_ctrl.subscribe();
        let interval = args.sync_interval();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = timer.tick() => {
                        if let Err(err) = world.sync.sync_all().await {
                            error!(%err, "batch sync cycle failed");
                        }
                    }
                }
            }
        })
    };

    // Serve until SIGINT/SIGTERM; announce the shutdown first so clients
    // see it before their sockets close.
    let shutdown_signal = {
        let ctx = Arc::clone(&ctx);
        async move {
            let ctrl_c = tokio::signal::ctrl_c();
            #[cfg(unix)]
            {
                let mut term = tokio::signal::unix::signal(
                    tokio::signal::unix::SignalKind::terminate(),
                )
                .expect("install SIGTERM handler");
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            #[cfg(not(unix))]
            {
                let _ = ctrl_c.await;
            }
            info!("shutdown signal received");
            ctx.broadcaster.server_shutdown("Server is shutting down");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    };

    network.serve(Arc::clone(&ctx), shutdown_signal).await?;
    let _ = ticker_task.await;
    let _ = sync_task.await;

    // Final drain: every online player, every category. Retry before
    // giving up; a non-zero exit means durable state may lag the cache.
    let mut attempt = 0;
    loop {
        attempt += 1;
        match world.sync.sync_all_on_shutdown().await {
            Ok(stats) if stats.failed == 0 => {
                info!(?stats, "final drain complete");
                break;
            }
            Ok(stats) => {
                warn!(?stats, attempt, "final drain left failures");
                if attempt >= 3 {
                    anyhow::bail!("final drain failed after {attempt} attempts");
                }
            }
            Err(err) => {
                warn!(%err, attempt, "final drain errored");
                if attempt >= 3 {
                    return Err(err);
                }
            }
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }

    info!("shutdown complete");
    Ok(())
}
