//! 购物车与结算服务入口
//!
//! 启动 RPC 监听器、RPC 回复消费者、支付事件消费者与支付 webhook 服务。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use cart_shared::{
    cache::Cache,
    config::AppConfig,
    database::Database,
    dlq::DlqProducer,
    kafka::{KafkaConsumer, KafkaProducer, topics},
    observability,
    retry::RetryPolicy,
};
use checkout_service::{
    dead_letter::DeadLetterSink,
    events::{KafkaOrderEventPublisher, SupervisedPublisher},
    ingress::{self, PaymentEventConsumer, WebhookState},
    lock::{LockConfig, RedisLock},
    payment::MercadoPagoClient,
    product_client::ProductRpcClient,
    repository::{OrderRepository, RedisCartRepository},
    rpc::{Dispatcher, KafkaRpcTransport, RpcClient, RpcListener, RpcTransport, run_reply_consumer},
    service::{CartService, CheckoutService, OrderQueryService, PaymentReconciler},
};
use axum::{Json, routing::get};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

const SERVICE_NAME: &str = "checkout-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load(SERVICE_NAME)?;

    let obs_config = config.observability.clone().with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        environment = %config.environment,
        production = config.is_production(),
        "Starting {} on {}",
        SERVICE_NAME,
        config.server_addr()
    );

    // 基础设施
    let db = Database::connect(&config.database).await?;
    let migrations_dir = std::env::var("MIGRATIONS_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(concat!(env!("CARGO_MANIFEST_DIR"), "/migrations")));
    db.run_migrations(&migrations_dir).await?;

    let cache = Cache::new(&config.redis)?;
    let producer = KafkaProducer::new(&config.kafka)?;

    let dead_letters: Arc<dyn DeadLetterSink> = Arc::new(
        DlqProducer::new(producer.clone(), SERVICE_NAME).with_topic(topics::DEAD_LETTER_QUEUE),
    );

    // RPC 传输：回复消费者使用实例独占的消费组
    let kafka_transport = KafkaRpcTransport::new(producer.clone(), &config.rpc.reply_topic);
    let reply_router = kafka_transport.router();
    let transport: Arc<dyn RpcTransport> = Arc::new(kafka_transport);

    let products = Arc::new(ProductRpcClient::new(RpcClient::new(
        transport.clone(),
        &config.rpc.product_topic,
        config.rpc.timeout(),
    )));
    let gateway = Arc::new(MercadoPagoClient::new(&config.payment)?);

    let carts = Arc::new(RedisCartRepository::new(cache.clone(), config.cart.ttl()));
    let orders = Arc::new(OrderRepository::new(db.pool().clone()));
    let lock = Arc::new(RedisLock::new(
        cache.client().clone(),
        LockConfig::with_ttl(config.cart.lock_ttl()),
    ));

    let events = SupervisedPublisher::new(
        Arc::new(KafkaOrderEventPublisher::new(producer.clone(), topics::ORDER_EVENTS)),
        dead_letters.clone(),
        RetryPolicy::default(),
        topics::ORDER_EVENTS,
    );

    // 业务服务
    let cart_service = Arc::new(CartService::new(carts.clone(), products.clone(), lock.clone()));
    let checkout_service = Arc::new(CheckoutService::new(
        carts.clone(),
        orders.clone(),
        products.clone(),
        gateway.clone(),
        events.clone(),
        config.cart.checkout_ttl(),
    ));
    let order_queries = Arc::new(OrderQueryService::new(orders.clone()));
    let reconciler = Arc::new(PaymentReconciler::new(
        gateway,
        orders,
        cart_service.clone(),
        products,
        lock,
        events,
    ));

    let dispatcher = Arc::new(Dispatcher::new(cart_service, checkout_service, order_queries));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // RPC 回复
    let reply_group = format!("{}.replies.{}", config.kafka.consumer_group, Uuid::now_v7());
    let reply_consumer = KafkaConsumer::with_group(&config.kafka, &reply_group, "latest")?;
    let reply_topic = config.rpc.reply_topic.clone();
    let reply_task = tokio::spawn(run_reply_consumer(
        reply_consumer,
        reply_router,
        reply_topic,
        shutdown_rx.clone(),
    ));

    // RPC 请求
    let listener = Arc::new(RpcListener::new(
        dispatcher,
        transport.clone(),
        dead_letters.clone(),
        config.rpc.redelivery_policy(),
    ));
    let request_consumer = KafkaConsumer::new(&config.kafka, Some("rpc"))?;
    let request_topic = config.rpc.request_topic.clone();
    let request_shutdown = shutdown_rx.clone();
    let listener_task = tokio::spawn(async move {
        listener
            .run(request_consumer, &request_topic, request_shutdown)
            .await
    });

    // 支付事件
    let payment_events = Arc::new(PaymentEventConsumer::new(
        reconciler.clone(),
        transport,
        dead_letters,
        config.rpc.redelivery_policy(),
    ));
    let payment_consumer = KafkaConsumer::new(&config.kafka, Some("payments"))?;
    let payments_task = tokio::spawn(payment_events.run(payment_consumer, shutdown_rx));

    // 支付 webhook
    let app = ingress::router(WebhookState {
        finalizer: reconciler,
        request_timeout: Duration::from_secs(config.http.request_timeout_secs),
    })
    .route(
        "/ready",
        get({
            let db = db.clone();
            move || readiness_check(db.clone(), cache.clone())
        }),
    );

    let tcp = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    axum::serve(tcp, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await?;

    for (name, task) in [
        ("reply consumer", reply_task),
        ("rpc listener", listener_task),
        ("payment events", payments_task),
    ] {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(task = name, error = %e, "后台任务异常退出"),
            Err(e) => error!(task = name, error = %e, "后台任务 panic"),
        }
    }

    db.close().await;
    info!("Server shutdown complete");

    Ok(())
}

/// 就绪探针：PostgreSQL 与 Redis 都可用才算就绪
async fn readiness_check(db: Database, cache: Cache) -> Json<serde_json::Value> {
    let db_ok = db.health_check().await.is_ok();
    let cache_ok = cache.health_check().await.is_ok();

    Json(serde_json::json!({
        "status": if db_ok && cache_ok { "ok" } else { "degraded" },
        "service": SERVICE_NAME,
        "checks": {
            "database": if db_ok { "ok" } else { "fail" },
            "redis": if cache_ok { "ok" } else { "fail" }
        }
    }))
}

/// 监听关闭信号
///
/// SIGTERM 或 Ctrl+C 任一到达即返回。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
