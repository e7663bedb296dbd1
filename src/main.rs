use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use notify_service::{
    api::{self, AppState},
    clients::{
        circuit_breaker::CircuitBreaker,
        database::Store,
        idempotency::IdempotencyCache,
        queue::{QueueBridge, QueueMessage},
        rate_limit::RateLimiter,
        redis::RedisClient,
    },
    config::Config,
    senders::{
        ChannelRouter, EmailSender, EmailSenderConfig, ProtectedSender, SmsSender, WebhookSender,
    },
    worker::{Worker, WorkerConfig},
};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(env = %config.env, port = config.port, "Starting notify-service");

    let store = Store::connect(&config.database_url())
        .await
        .context("failed to connect to database")?;

    // Redis powers idempotency and rate limiting; both degrade gracefully
    // when it is unreachable.
    let redis_client = match RedisClient::connect(&config.redis_url()).await {
        Ok(client) => Some(client),
        Err(e) => {
            warn!(
                error = %e,
                "Redis unavailable, idempotency and rate limiting disabled"
            );
            None
        }
    };

    let idempotency = redis_client
        .as_ref()
        .map(|c| IdempotencyCache::new(c.connection(), config.idempotency_reserve_ttl_seconds));

    let limiter = redis_client.as_ref().map(|c| {
        RateLimiter::new(
            c.connection(),
            config.rate_limit_per_minute,
            Duration::from_secs(60),
        )
    });

    let bridge = match &config.amqp_url {
        Some(url) => match QueueBridge::connect(url, &config.amqp_queue).await {
            Ok(bridge) => Some(bridge),
            Err(e) => {
                warn!(
                    error = %e,
                    "Queue bridge unavailable, delivery falls back to polling only"
                );
                None
            }
        },
        None => None,
    };

    // One breaker per downstream provider, owned by the router assembly.
    let email_sender = EmailSender::new(EmailSenderConfig {
        smtp_host: config.smtp_host.clone(),
        smtp_port: config.smtp_port,
        smtp_username: config.smtp_username.clone(),
        smtp_password: config.smtp_password.clone(),
        from_address: config.smtp_from.clone(),
        use_tls: config.smtp_tls,
    })
    .context("failed to initialize email sender")?;

    let sms_sender = SmsSender::new(config.sms_region()).await;

    let webhook_sender = WebhookSender::new(
        Duration::from_secs(config.webhook_timeout),
        Duration::from_secs(config.webhook_timeout_ceiling),
    );

    let breaker_config = config.circuit_breaker_config();
    let router = Arc::new(ChannelRouter::new(vec![
        ProtectedSender::new(
            Box::new(email_sender),
            Arc::new(CircuitBreaker::new("email", breaker_config.clone())),
        ),
        ProtectedSender::new(
            Box::new(sms_sender),
            Arc::new(CircuitBreaker::new("sms", breaker_config.clone())),
        ),
        ProtectedSender::new(
            Box::new(webhook_sender),
            Arc::new(CircuitBreaker::new("webhook", breaker_config)),
        ),
    ]));

    let worker = Arc::new(Worker::new(
        store.clone(),
        Arc::clone(&router),
        WorkerConfig {
            poll_interval: config.worker_poll_interval(),
            batch_size: config.worker_batch_size,
            max_attempts: config.max_attempts,
            circuit_open_retry_delay: config.circuit_open_retry_delay(),
        },
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let worker_task = {
        let worker = Arc::clone(&worker);
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { worker.run(rx).await })
    };

    let consumer_task = bridge.clone().map(|bridge| {
        let store = store.clone();
        let worker = Arc::clone(&worker);
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { run_bridge_consumer(bridge, store, worker, rx).await })
    });

    let state = AppState {
        store: store.clone(),
        idempotency,
        limiter,
        bridge,
        router,
        config: config.clone(),
    };
    let app = api::app_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind listener")?;

    info!(address = %addr, "Server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Signaling background tasks to shut down");
    let _ = shutdown_tx.send(true);

    tokio::select! {
        _ = async {
            let _ = worker_task.await;
            if let Some(task) = consumer_task {
                let _ = task.await;
            }
        } => {
            info!("Background tasks finished");
        }
        _ = tokio::time::sleep(Duration::from_secs(10)) => {
            warn!("Timeout waiting for background tasks to finish");
        }
    }

    store.close().await;

    Ok(())
}

/// Alternative dispatch path: a broker message names a stored row; the
/// consumer claims it and runs the same delivery path as the polling worker.
/// Every message is acked because retry state lives in the store.
async fn run_bridge_consumer(
    bridge: QueueBridge,
    store: Store,
    worker: Arc<Worker<Store>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut consumer = match bridge.create_consumer("notify_worker").await {
        Ok(consumer) => consumer,
        Err(e) => {
            error!(error = %e, "Failed to start queue consumer");
            return;
        }
    };

    loop {
        tokio::select! {
            delivery = consumer.next() => {
                let Some(delivery) = delivery else { break };

                match delivery {
                    Ok(delivery) => {
                        let delivery_tag = delivery.delivery_tag;

                        match serde_json::from_slice::<QueueMessage>(&delivery.data) {
                            Ok(message) => match store.claim_one(message.notification_id).await {
                                Ok(Some(notification)) => worker.deliver(notification).await,
                                Ok(None) => debug!(
                                    notification_id = %message.notification_id,
                                    "Notification already claimed or not due, skipping"
                                ),
                                Err(e) => error!(
                                    error = %e,
                                    notification_id = %message.notification_id,
                                    "Failed to claim notification from queue message"
                                ),
                            },
                            Err(e) => warn!(error = %e, "Unreadable queue message"),
                        }

                        if let Err(e) = bridge.acknowledge(delivery_tag).await {
                            error!(error = %e, "Failed to acknowledge queue message");
                        }
                    }
                    Err(e) => error!(error = %e, "Queue consumer error"),
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    info!("Queue consumer stopping");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "Failed to install signal handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}
