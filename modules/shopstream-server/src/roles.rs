//! Wiring of backends, handlers, dispatchers, and routes per service role.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use shopstream_aggregates::{
    CartPopularityHandler, MemoryAggregateStore, MemoryCache, PgAggregateStore, PgCache,
    ProductActivityHandler, ProductPopularityHandler, RecommendationReader, RecommendationStore,
    ResponseCache, StatisticsStore, UserActivityHandler,
};
use shopstream_common::{Backend, Config, Role, PRODUCT_UPDATES, USER_UPDATES};
use shopstream_events::{
    Dispatcher, DispatcherConfig, HandlerBindings, Instrumented, LogConsumer, LogProducer,
    MemoryLog, PgLog, Publisher,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::JwtService;
use crate::catalog::{ProductCatalog, UserDirectory};
use crate::routes;
use crate::shutdown::Shutdown;
use crate::state::{AnalyticsState, ProductsState, RecommendationsState, UsersState};

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub enum LogBackend {
    Memory(MemoryLog),
    Postgres(PgLog),
}

impl LogBackend {
    pub fn producer(&self) -> Arc<dyn LogProducer> {
        match self {
            LogBackend::Memory(log) => Arc::new(log.producer()),
            LogBackend::Postgres(log) => Arc::new(log.producer()),
        }
    }

    pub fn consumer(&self, group: &str) -> Box<dyn LogConsumer> {
        match self {
            LogBackend::Memory(log) => Box::new(log.consumer(group)),
            LogBackend::Postgres(log) => Box::new(log.consumer(group)),
        }
    }
}

/// Everything a role needs from the outside world.
#[derive(Clone)]
pub struct Backends {
    pub log: LogBackend,
    pub statistics: Arc<dyn StatisticsStore>,
    pub recommendations: Arc<dyn RecommendationStore>,
    pub cache: Arc<dyn ResponseCache>,
}

impl Backends {
    /// A self-contained process: in-memory log, stores, and cache.
    pub fn in_memory() -> Self {
        let store = Arc::new(MemoryAggregateStore::new());
        Self {
            log: LogBackend::Memory(MemoryLog::new()),
            statistics: store.clone(),
            recommendations: store,
            cache: Arc::new(MemoryCache::new()),
        }
    }

    pub async fn connect(config: &Config) -> Result<Self> {
        let needs_pool =
            config.backend == Backend::Postgres || config.cache_backend == Backend::Postgres;
        let pool = if needs_pool {
            Some(connect_pool(config).await?)
        } else {
            None
        };

        let memory = Self::in_memory();

        let (log, statistics, recommendations) = match (&pool, config.backend) {
            (Some(pool), Backend::Postgres) => {
                let store = Arc::new(PgAggregateStore::new(pool.clone()));
                let statistics: Arc<dyn StatisticsStore> = store.clone();
                let recommendations: Arc<dyn RecommendationStore> = store;
                (LogBackend::Postgres(PgLog::new(pool.clone())), statistics, recommendations)
            }
            _ => (memory.log, memory.statistics, memory.recommendations),
        };

        let cache: Arc<dyn ResponseCache> = match (pool, config.cache_backend) {
            (Some(pool), Backend::Postgres) => Arc::new(PgCache::new(pool)),
            _ => memory.cache,
        };

        info!(
            backend = ?config.backend,
            cache_backend = ?config.cache_backend,
            "Backends ready"
        );
        Ok(Self {
            log,
            statistics,
            recommendations,
            cache,
        })
    }
}

async fn connect_pool(config: &Config) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to Postgres")?;
    info!("Connected to database");

    sqlx::migrate!("../../migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    info!("Migrations complete");

    Ok(pool)
}

// ---------------------------------------------------------------------------
// Assembly
// ---------------------------------------------------------------------------

/// The parts of a process built from one or more roles.
pub struct Assembled {
    pub router: Router,
    pub dispatchers: Vec<Dispatcher>,
    pub publishers: Vec<Publisher>,
    pub readers: Vec<RecommendationReader>,
    pub cache_sweep_interval: Duration,
}

/// Build routers, dispatchers, publishers, and readers for `roles`.
/// `metrics` adds a `/metrics` route rendering that recorder.
pub fn assemble(
    roles: &[Role],
    backends: &Backends,
    config: &Config,
    metrics: Option<PrometheusHandle>,
) -> Assembled {
    let dispatcher_config = DispatcherConfig {
        poll_timeout: config.poll_timeout,
        failure_policy: config.failure_policy,
    };

    let mut routers = Vec::new();
    let mut dispatchers = Vec::new();
    let mut publishers = Vec::new();
    let mut readers = Vec::new();

    for role in roles {
        match role {
            Role::Products => {
                let publisher = publisher(backends, config, PRODUCT_UPDATES);
                publishers.push(publisher.clone());
                routers.push(routes::products_routes(ProductsState {
                    catalog: Arc::new(ProductCatalog::new(publisher)),
                }));
            }
            Role::Users => {
                let publisher = publisher(backends, config, USER_UPDATES);
                publishers.push(publisher.clone());
                routers.push(routes::users_routes(UsersState {
                    directory: Arc::new(UserDirectory::new(publisher)),
                    jwt: jwt_service(config),
                }));
            }
            Role::Analytics => {
                let product = Instrumented::new(
                    PRODUCT_UPDATES,
                    ProductActivityHandler::new(backends.statistics.clone()),
                );
                let user = Instrumented::new(
                    USER_UPDATES,
                    UserActivityHandler::new(backends.statistics.clone()),
                );
                let bindings = HandlerBindings::new()
                    .on_product_updates(Arc::new(product))
                    .on_user_updates(Arc::new(user));
                dispatchers.push(dispatcher(backends, *role, bindings, &dispatcher_config));
            }
            Role::Recommendations => {
                let product = Instrumented::new(
                    PRODUCT_UPDATES,
                    ProductPopularityHandler::new(backends.recommendations.clone()),
                );
                let cart = Instrumented::new(
                    USER_UPDATES,
                    CartPopularityHandler::new(backends.recommendations.clone()),
                );
                let bindings = HandlerBindings::new()
                    .on_product_updates(Arc::new(product))
                    .on_user_updates(Arc::new(cart));
                dispatchers.push(dispatcher(backends, *role, bindings, &dispatcher_config));

                let reader = RecommendationReader::new(
                    backends.recommendations.clone(),
                    backends.cache.clone(),
                    config.cache_ttl,
                );
                readers.push(reader.clone());
                routers.push(routes::recommendations_routes(RecommendationsState {
                    reader,
                    store: backends.recommendations.clone(),
                }));
            }
        }
    }

    if roles.contains(&Role::Analytics) {
        routers.push(routes::analytics_routes(AnalyticsState {
            store: backends.statistics.clone(),
        }));
    }

    Assembled {
        router: routes::build_router(routers, metrics),
        dispatchers,
        publishers,
        readers,
        cache_sweep_interval: config.cache_sweep_interval,
    }
}

fn jwt_service(config: &Config) -> JwtService {
    match &config.jwt_secret {
        Some(secret) => JwtService::new(secret),
        None => {
            warn!("JWT_SECRET not set, tokens will not survive a restart");
            JwtService::new(&Uuid::new_v4().to_string())
        }
    }
}

fn publisher(backends: &Backends, config: &Config, topic: &str) -> Publisher {
    Publisher::new(
        backends.log.producer(),
        topic,
        config.publish_timeout,
        config.flush_timeout,
    )
}

fn dispatcher(
    backends: &Backends,
    role: Role,
    bindings: HandlerBindings,
    config: &DispatcherConfig,
) -> Dispatcher {
    // Roles with handlers always have a group.
    let group = role.consumer_group().unwrap_or(role.as_str());
    Dispatcher::for_bindings(
        backends.log.consumer(group),
        group,
        bindings,
        config.clone(),
    )
}

// ---------------------------------------------------------------------------
// Running
// ---------------------------------------------------------------------------

/// Subscribe every dispatcher, then serve HTTP until `shutdown` fires.
///
/// A subscription failure aborts startup. Once running, dispatcher and
/// close failures are logged and shutdown carries on. Teardown order:
/// dispatchers joined, publishers flushed and closed, readers closed.
pub async fn run(assembled: Assembled, listener: TcpListener, shutdown: Shutdown) -> Result<()> {
    let Assembled {
        router,
        dispatchers,
        publishers,
        readers,
        cache_sweep_interval,
    } = assembled;

    let mut subscribed = Vec::with_capacity(dispatchers.len());
    for mut dispatcher in dispatchers {
        let group = dispatcher.group().to_string();
        dispatcher
            .subscribe()
            .await
            .with_context(|| format!("Consumer group '{group}' failed to subscribe"))?;
        subscribed.push(dispatcher);
    }

    let tasks: Vec<JoinHandle<()>> = subscribed
        .into_iter()
        .map(|dispatcher| spawn_dispatcher(dispatcher, shutdown.clone()))
        .collect();
    let sweepers: Vec<JoinHandle<()>> = readers
        .iter()
        .map(|reader| {
            spawn_cache_sweeper(reader.clone(), cache_sweep_interval, shutdown.clone())
        })
        .collect();

    let addr = listener.local_addr()?;
    info!(addr = %addr, "HTTP server listening");

    let signal = shutdown.clone();
    let served = axum::serve(listener, router)
        .with_graceful_shutdown(async move { signal.wait().await })
        .await;

    // Stop consumers whether the server exited cleanly or not.
    shutdown.trigger();
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Dispatcher task panicked");
        }
    }
    for sweeper in sweepers {
        if let Err(e) = sweeper.await {
            error!(error = %e, "Cache sweeper panicked");
        }
    }
    for publisher in &publishers {
        publisher.close().await;
    }
    for reader in &readers {
        reader.close().await;
    }

    served.context("HTTP server failed")?;
    info!("Shutdown complete");
    Ok(())
}

fn spawn_dispatcher(mut dispatcher: Dispatcher, shutdown: Shutdown) -> JoinHandle<()> {
    tokio::spawn(async move {
        let stop = shutdown.flag();
        let group = dispatcher.group().to_string();

        match dispatcher.run(&stop).await {
            Ok(stats) => info!(group = %group, stats = ?stats, "Dispatcher stopped"),
            Err(e) => {
                error!(group = %group, error = %e, "Dispatcher failed");
                shutdown.trigger();
            }
        }

        if let Err(e) = dispatcher.close().await {
            warn!(group = %group, error = %e, "Failed to close consumer");
        }
    })
}

/// Periodically drop expired cache entries until shutdown.
fn spawn_cache_sweeper(
    reader: RecommendationReader,
    interval: Duration,
    shutdown: Shutdown,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => match reader.evict_expired().await {
                    Ok(removed) => debug!(removed, "Cache sweep"),
                    Err(e) => warn!(error = %e, "Cache sweep failed"),
                },
            }
        }
    })
}
