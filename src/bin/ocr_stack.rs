use std::sync::Arc;

use anyhow::Result;
use ocr_rpc_gateway::config::ServiceConfig;
use ocr_rpc_gateway::gateway::{self, AuthServiceClient, GatewayState, Hs256Validator};
use ocr_rpc_gateway::ocr::{PlainTextEngine, ocr_handler};
use ocr_rpc_gateway::rpc_queue::{
    InMemoryBroker, RpcClient, RpcClientConfig, RpcWorker, RpcWorkerConfig,
};
use ocr_rpc_gateway::{OCR_QUEUE, declare_service_queues};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = ServiceConfig::from_env()?;
    info!(?config, "Starting OCR stack");

    let broker = InMemoryBroker::new();
    let gateway_channel = Arc::new(broker.connect());
    declare_service_queues(gateway_channel.as_ref()).await?;

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let worker = RpcWorker::new(
        Arc::new(broker.connect()),
        RpcWorkerConfig::builder()
            .work_queue(OCR_QUEUE)
            .concurrency(config.worker_concurrency)
            .consumer_tag("ocr-worker")
            .build(),
        ocr_handler(Arc::new(PlainTextEngine)),
    );
    let worker_task = tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.wait_for(|stop| *stop).await;
        };
        if let Err(e) = worker.run_until(shutdown).await {
            error!(error = %e, "OCR worker stopped");
        }
    });

    let rpc = Arc::new(
        RpcClient::connect(
            gateway_channel,
            RpcClientConfig::builder()
                .work_queue(OCR_QUEUE)
                .timeout(config.rpc_timeout)
                .build(),
        )
        .await?,
    );

    let state = GatewayState::new(
        Arc::clone(&rpc),
        Hs256Validator::new(&config.jwt_secret),
        AuthServiceClient::new(config.auth_base_url.clone()),
    );

    let listener = TcpListener::bind(config.gateway_addr).await?;
    info!(addr = %listener.local_addr()?, "Gateway listening");

    axum::serve(listener, gateway::router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl-C");
            }
            info!("Shutting down");
        })
        .await?;

    rpc.close().await;
    let _ = shutdown_tx.send(true);
    worker_task.await?;

    info!("OCR stack stopped");
    Ok(())
}
