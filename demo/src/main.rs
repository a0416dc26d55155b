use anyhow::Result;
use outbox_application::subscriber::AUDIT_SUBSCRIBER_PROCESSED;
use outbox_application::{
    AuditHistorySubscriber, BusBackend, InMemoryEventLog, OutboxConfig, OutboxService,
};
use outbox_domain::eventing::{EventBus, InMemoryEventBus, NoopEventBus, OutboxPublisher};
use outbox_domain::message::NewMessage;
use outbox_domain::metrics::PrometheusMetrics;
use outbox_domain::persist::{InMemoryOutboxRepository, OutboxRepository};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const FRUIT_TOPIC: &str = "fruit.events";

#[derive(Debug, Serialize)]
struct FruitCreated<'a> {
    id: i64,
    name: &'a str,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = OutboxConfig::from_env()?;
    info!(
        interval = ?config.worker_interval,
        batch_size = config.worker_batch_size,
        publish_timeout = ?config.publish_timeout,
        backend = ?config.bus_backend,
        "configuration loaded"
    );

    let bus: Arc<dyn EventBus> = match config.bus_backend {
        BusBackend::Memory => Arc::new(InMemoryEventBus::default()),
        BusBackend::Noop => Arc::new(NoopEventBus),
    };

    #[cfg(feature = "postgres")]
    if let Some(url) = config.database_url.as_deref() {
        use outbox_domain::persist::PgOutboxRepository;

        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await?;
        let repository = PgOutboxRepository::new(pool);
        repository.migrate().await?;
        info!("using postgres outbox store");
        return run(repository, bus, &config).await;
    }

    if config.database_url.is_some() {
        warn!("DATABASE_URL is set but postgres support is not enabled; using in-memory store");
    }
    run(InMemoryOutboxRepository::new(), bus, &config).await
}

async fn run<R>(repository: R, bus: Arc<dyn EventBus>, config: &OutboxConfig) -> Result<()>
where
    R: OutboxRepository + Clone + 'static,
    R::Tx: 'static,
{
    let metrics = Arc::new(PrometheusMetrics::new()?);
    metrics.register_counter(
        AUDIT_SUBSCRIBER_PROCESSED,
        "Events recorded by the audit history subscriber",
        &[],
    )?;
    let log = Arc::new(InMemoryEventLog::new());

    Arc::new(
        AuditHistorySubscriber::builder()
            .log(log.clone())
            .metrics(metrics.clone())
            .build(),
    )
    .subscribe(bus.as_ref(), FRUIT_TOPIC)
    .await?;

    // 生产方：业务写入与投递意图在同一事务内提交
    let service = OutboxService::new(repository.clone());
    let mut tx = service.repository().begin().await?;
    for (id, name) in [(1, "apple"), (2, "pear"), (3, "plum")] {
        let payload = serde_json::to_vec(&FruitCreated { id, name })?;
        let message = NewMessage::builder()
            .aggregate_id(id)
            .aggregate_type("fruit")
            .payload(payload)
            .metadata("fruit.created")
            .build();
        service.new_outbox_message(&mut tx, FRUIT_TOPIC, message).await?;
    }
    service.repository().commit(tx).await?;

    let publisher = Arc::new(
        OutboxPublisher::builder()
            .repository(repository)
            .event_bus(bus.clone())
            .metrics(metrics.clone())
            .config(config.publisher_config())
            .build(),
    );
    let handle = publisher.start();

    info!("outbox demo running, press ctrl-c to stop");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = tokio::time::sleep(config.worker_interval * 3) => {}
    }

    handle.shutdown();
    handle.join().await;
    bus.shutdown().await?;

    for entry in log.entries() {
        info!(
            id = %entry.id,
            aggregate_id = entry.aggregate_id,
            event_type = %entry.event_type,
            data = %String::from_utf8_lossy(&entry.data),
            "audit log entry"
        );
    }
    info!("metrics:\n{}", String::from_utf8_lossy(&metrics.gather()?));
    Ok(())
}
