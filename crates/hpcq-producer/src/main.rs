//! The Producer Endpoint (spec §4.2): a public HTTPS-fronted handler that
//! authenticates by shared API key, mints a short job id, and enqueues a Job
//! Message.
//!
//! Grounded on `fourthplaces-mntogether`'s `server/app.rs` (`Router` built
//! from a shared `Arc`-wrapped state struct, `TraceLayer`, auth applied as a
//! `middleware::from_fn` layer ahead of the route handlers).

mod routes;

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use hpcq_core::config::{ApiAuthConfig, QueueConfig, QueueEndpointConfig};
use hpcq_queue_client::QueueClient;

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Parser)]
#[command(name = "hpcq-producer", version, about = "HPC job submission endpoint")]
struct Cli {
    #[command(flatten)]
    auth: ApiAuthConfig,
    #[command(flatten)]
    queue: QueueConfig,
    #[command(flatten)]
    queue_endpoint: QueueEndpointConfig,

    /// Address to bind the HTTP listener to.
    #[arg(long, env = "PRODUCER_BIND_ADDR", default_value_t = default_bind_addr())]
    bind_addr: String,
}

pub struct AppState {
    queue_client: Arc<QueueClient>,
    jobs_queue_id: String,
    api_key: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let http = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
    let queue_client = Arc::new(QueueClient::new(
        http,
        cli.queue_endpoint.base_url,
        cli.queue.account_id,
        cli.queue.api_token,
    ));

    let state = Arc::new(AppState {
        queue_client,
        jobs_queue_id: cli.queue.jobs_queue_id,
        api_key: cli.auth.api_key,
    });

    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&cli.bind_addr).await?;
    tracing::info!(addr = %cli.bind_addr, "hpcq-producer listening");
    axum::serve(listener, app).await?;

    Ok(())
}
