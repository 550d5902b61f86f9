use std::sync::Arc;

use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tracing::{debug, error, info};

use printforge_auth::{ApiKeyVerifier, AuthContext, HmacCsrfTokens};
use printforge_core::{OrderId, PrintJobId};
use printforge_events::{EventBus, InMemoryEventBus, Subscription};
use printforge_infra::audit::Subject;
use printforge_infra::config::{AppConfig, RateLimitConfig};
use printforge_infra::gateway::{
    AsyncStatusGateway, FixedWindowRateLimiter, InMemoryProcessTokenStore,
    PostgresProcessTokenStore, ProcessTokenStore, ProcessTokens, RateLimiter, UrlSigner,
};
use printforge_infra::notifications::{
    InMemoryNotificationStore, NotificationDispatcher, NotificationStore, PostgresNotificationStore,
    PreferenceStore,
};
use printforge_infra::store::{
    InMemorySyncStore, OrderStore, PostgresSyncStore, StoreError, SyncStore,
};
use printforge_infra::sync::{NewOrder, OrderView};
use printforge_infra::{SyncEngine, SyncError, SyncEvent};

#[cfg(feature = "redis")]
use printforge_infra::gateway::RedisRateLimiter;

use crate::app::errors::{self, ErrorResponse};

pub type Bus = Arc<InMemoryEventBus<SyncEvent>>;

#[derive(Debug, Error)]
pub enum ServicesError {
    #[error("database: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("database_url is required for persistent stores")]
    MissingDatabaseUrl,

    #[error("redis: {0}")]
    Redis(String),
}

/// Everything a handler needs, shared behind one `Arc`.
pub struct AppServices {
    pub engine: SyncEngine<Bus>,
    pub dispatcher: Arc<NotificationDispatcher>,
    pub gateway: AsyncStatusGateway,
    pub tokens: ProcessTokens,
    pub csrf: Arc<HmacCsrfTokens>,
    pub csrf_ttl: chrono::Duration,
    /// Device feed authentication.
    pub device_keys: ApiKeyVerifier,
    pub notify_limiter: Arc<dyn RateLimiter>,
}

/// A freshly placed order plus the process tokens issued for it.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    pub view: OrderView,
    pub order_token: String,
    pub job_tokens: Vec<(PrintJobId, String)>,
}

struct Stores {
    sync: Arc<dyn SyncStore>,
    notifications: Arc<dyn NotificationStore>,
    preferences: Arc<dyn PreferenceStore>,
    tokens: Arc<dyn ProcessTokenStore>,
}

pub async fn build_services(config: &AppConfig) -> Result<Arc<AppServices>, ServicesError> {
    let stores = if config.use_persistent_stores {
        build_persistent_stores(config).await?
    } else {
        build_in_memory_stores()
    };

    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let subscription = bus.subscribe();
    let engine = SyncEngine::new(stores.sync.clone(), bus);

    let tokens = ProcessTokens::new(stores.tokens, config.process_token_ttl);
    let csrf = Arc::new(HmacCsrfTokens::new(
        config.csrf_secret.clone(),
        config.csrf_token_ttl,
    ));

    let dispatcher = Arc::new(NotificationDispatcher::new(
        stores.notifications,
        stores.preferences,
        tokens.clone(),
        stores.sync.clone(),
        ApiKeyVerifier::new(config.worker_api_key.clone()),
        csrf.clone(),
        config.dispatcher.clone(),
    ));

    let gateway = AsyncStatusGateway::new(
        rate_limiter(config.status_rate_limit, config.redis_url.as_deref())?,
        csrf.clone(),
        tokens.clone(),
        stores.sync,
        UrlSigner::new(config.url_signing_secret.clone(), config.download_url_ttl),
        dispatcher.clone(),
    );

    spawn_notification_subscriber(subscription, dispatcher.clone());

    Ok(Arc::new(AppServices {
        engine,
        dispatcher,
        gateway,
        tokens,
        csrf,
        csrf_ttl: config.csrf_token_ttl,
        device_keys: ApiKeyVerifier::new(config.worker_api_key.clone()),
        notify_limiter: rate_limiter(config.notify_rate_limit, config.redis_url.as_deref())?,
    }))
}

fn build_in_memory_stores() -> Stores {
    let notifications = Arc::new(InMemoryNotificationStore::new());
    Stores {
        sync: Arc::new(InMemorySyncStore::new()),
        notifications: notifications.clone(),
        preferences: notifications,
        tokens: Arc::new(InMemoryProcessTokenStore::new()),
    }
}

async fn build_persistent_stores(config: &AppConfig) -> Result<Stores, ServicesError> {
    let url = config
        .database_url
        .as_deref()
        .ok_or(ServicesError::MissingDatabaseUrl)?;
    let pool = PgPoolOptions::new().max_connections(10).connect(url).await?;
    printforge_infra::store::postgres::migrate(&pool).await?;
    info!("using postgres-backed stores");

    let notifications = Arc::new(PostgresNotificationStore::new(pool.clone()));
    Ok(Stores {
        sync: Arc::new(PostgresSyncStore::new(pool.clone())),
        notifications: notifications.clone(),
        preferences: notifications,
        tokens: Arc::new(PostgresProcessTokenStore::new(pool)),
    })
}

fn rate_limiter(
    config: RateLimitConfig,
    redis_url: Option<&str>,
) -> Result<Arc<dyn RateLimiter>, ServicesError> {
    #[cfg(feature = "redis")]
    {
        if let Some(url) = redis_url {
            let limiter = RedisRateLimiter::new(url, config)
                .map_err(|e| ServicesError::Redis(e.to_string()))?;
            return Ok(Arc::new(limiter));
        }
    }
    #[cfg(not(feature = "redis"))]
    {
        if redis_url.is_some() {
            tracing::warn!("REDIS_URL set but the redis feature is disabled; limiting in process");
        }
    }
    Ok(Arc::new(FixedWindowRateLimiter::new(config)))
}

/// Feed committed transitions to the dispatcher on a dedicated thread.
///
/// The thread exits once the engine (and with it the bus) is dropped.
fn spawn_notification_subscriber(
    subscription: Subscription<SyncEvent>,
    dispatcher: Arc<NotificationDispatcher>,
) {
    let runtime = tokio::runtime::Handle::current();
    let spawned = std::thread::Builder::new()
        .name("sync-notifications".to_string())
        .spawn(move || {
            // Postgres stores block on this runtime.
            let _guard = runtime.enter();
            while let Ok(event) = subscription.recv() {
                // Failures are logged by the dispatcher.
                let _ = dispatcher.handle_sync_event(&event);
            }
            debug!("sync event bus closed; notification subscriber stopped");
        });
    if let Err(e) = spawned {
        error!(error = %e, "failed to start notification subscriber");
    }
}

impl AppServices {
    /// Checkout, then one process token for the order and one per job.
    pub fn place_order(&self, input: NewOrder, auth: &AuthContext) -> Result<PlacedOrder, SyncError> {
        let view = self.engine.create_order(input, auth)?;
        let order_id = view.order.id_typed();
        let order_token = self.issue_token(order_id, Subject::Order(order_id))?;
        let job_ids: Vec<PrintJobId> = view.jobs.iter().map(|j| j.id_typed()).collect();
        let job_tokens = self.issue_job_tokens(order_id, &job_ids)?;
        Ok(PlacedOrder {
            view,
            order_token,
            job_tokens,
        })
    }

    /// Tokens for jobs created after checkout (queueing, retries).
    pub fn issue_job_tokens(
        &self,
        order_id: OrderId,
        job_ids: &[PrintJobId],
    ) -> Result<Vec<(PrintJobId, String)>, SyncError> {
        job_ids
            .iter()
            .map(|&id| Ok((id, self.issue_token(order_id, Subject::PrintJob(id))?)))
            .collect()
    }

    fn issue_token(&self, order_id: OrderId, subject: Subject) -> Result<String, SyncError> {
        let order = self
            .engine
            .store()
            .get_order(order_id)?
            .ok_or_else(|| SyncError::not_found(format!("order {order_id}")))?;
        let owner = order
            .customer_id()
            .ok_or(SyncError::MissingRequiredField("customer_id"))?;
        let token = self.tokens.issue(owner, subject, Utc::now())?;
        debug!(subject = subject.kind(), "process token issued");
        Ok(token.token)
    }
}

/// Run a blocking service call off the async runtime and render its error.
pub async fn run<T, E, F>(f: F) -> Result<T, axum::response::Response>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: ErrorResponse + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.into_error_response()),
        Err(e) => {
            error!(error = %e, "blocking task failed");
            Err(errors::internal_error())
        }
    }
}
