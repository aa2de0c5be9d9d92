mod telemetry;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use sentinel_broker::Broker;
use sentinel_broker_memory::MemoryBroker;
use sentinel_broker_nats::NatsBroker;
use sentinel_gateway::{AppState, router, spawn_hub};
use sentinel_pipeline::sensor::SensorConfig;
use sentinel_pipeline::{
    Authorizer, Classifier, ConsumeLoop, Correlator, Effector, ExecutionMode, MessageHandler,
    Planner, SensorWorker, WorkerContext, topology,
};
use sentinel_policy::{HttpPolicyClient, PolicyClient, StaticPolicyClient};
use sentinel_store::Store;
use sentinel_store_memory::MemoryStore;
use sentinel_store_postgres::{PostgresConfig, PostgresStore};

/// Which part of the pipeline this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Role {
    /// Every worker plus the gateway in one process (local development).
    All,
    Sensor,
    Classifier,
    Correlator,
    Planner,
    Authorizer,
    Effector,
    Gateway,
}

/// Sentinel node: stateless pipeline workers over a durable broker, with an
/// operator gateway.
#[derive(Parser, Debug)]
#[command(name = "sentinel-server", about = "Sentinel decision-pipeline node")]
struct Cli {
    /// Role to run in this process.
    #[arg(long, value_enum, default_value = "all")]
    role: Role,

    /// Broker URL: `memory://` or `nats://host:port`.
    #[arg(long, env = "SENTINEL_BROKER_URL", default_value = "memory://")]
    broker_url: String,

    /// Store URL: `memory://` or `postgres://...`.
    #[arg(long, env = "SENTINEL_STORE_URL", default_value = "memory://")]
    store_url: String,

    /// Policy engine base URL; unset means a static allow-all policy.
    #[arg(long, env = "SENTINEL_POLICY_URL")]
    policy_url: Option<String>,

    /// Envelope MAC key, shared by every worker.
    #[arg(long, env = "SENTINEL_SIGNING_SECRET", default_value = "sentinel-dev-secret")]
    signing_secret: String,

    /// Producer identifier stamped into envelopes; generated when absent.
    #[arg(long, env = "SENTINEL_AGENT_ID")]
    agent_id: Option<String>,

    /// Gateway bind address.
    #[arg(long, env = "SENTINEL_HTTP_ADDR", default_value = "127.0.0.1:8080")]
    http_addr: SocketAddr,

    /// OTLP trace collector endpoint; unset disables span export.
    #[arg(long, env = "SENTINEL_OTLP_ENDPOINT")]
    otlp_endpoint: Option<String>,

    /// Record effects as simulated instead of executed.
    #[arg(long, env = "SENTINEL_SIMULATE_EFFECTS", default_value_t = false)]
    simulate_effects: bool,

    /// Policy bundle version recorded in envelopes.
    #[arg(long, env = "SENTINEL_POLICY_VERSION", default_value = "")]
    policy_version: String,
}

impl Role {
    fn runs(self, role: Role) -> bool {
        self == Role::All || self == role
    }
}

async fn build_broker(url: &str) -> Result<Arc<dyn Broker>, Box<dyn std::error::Error>> {
    if url.starts_with("memory://") {
        Ok(Arc::new(MemoryBroker::new()))
    } else if url.starts_with("nats://") {
        Ok(Arc::new(NatsBroker::connect(url).await?))
    } else {
        Err(format!("unsupported broker URL scheme: {url}").into())
    }
}

async fn build_store(url: &str) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    if url.starts_with("memory://") {
        Ok(Arc::new(MemoryStore::new()))
    } else if url.starts_with("postgres://") || url.starts_with("postgresql://") {
        let config = PostgresConfig {
            url: url.to_string(),
            ..PostgresConfig::default()
        };
        Ok(Arc::new(PostgresStore::new(config).await?))
    } else {
        Err(format!("unsupported store URL scheme: {url}").into())
    }
}

fn build_policy(url: Option<&str>) -> Result<Arc<dyn PolicyClient>, Box<dyn std::error::Error>> {
    match url {
        Some(url) => Ok(Arc::new(HttpPolicyClient::new(url, Duration::from_secs(5))?)),
        None => Ok(Arc::new(StaticPolicyClient::allow_all())),
    }
}

#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let guard = telemetry::init("sentinel", cli.otlp_endpoint.as_deref());

    let agent_id = cli.agent_id.clone().unwrap_or_else(|| {
        format!("node-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
    });
    info!(role = ?cli.role, agent_id = %agent_id, "sentinel node starting");

    let broker = build_broker(&cli.broker_url).await?;
    let store = build_store(&cli.store_url).await?;
    let policy = build_policy(cli.policy_url.as_deref())?;

    // Stream creation is idempotent; every role ensures the topology so any
    // single process can start first.
    for spec in topology::streams() {
        broker.ensure_stream(&spec).await?;
    }

    let mut ctx = WorkerContext::new(
        Arc::clone(&broker),
        Arc::clone(&store),
        policy,
        agent_id.clone(),
        cli.signing_secret.clone().into_bytes(),
    );
    ctx.policy_version = cli.policy_version.clone();

    let shutdown = CancellationToken::new();
    let mut tasks = JoinSet::new();

    // Ctrl-C cancels the root token; workers drain and exit.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
                shutdown.cancel();
            }
        });
    }

    let spawn_loop = |stream: &'static str,
                          spec: sentinel_broker::ConsumerSpec,
                          handler: Arc<dyn MessageHandler>,
                          tasks: &mut JoinSet<()>| {
        let consume = ConsumeLoop::new(
            Arc::clone(&ctx.broker),
            stream,
            spec,
            handler,
            Arc::clone(&ctx.metrics),
        );
        tasks.spawn(consume.run(shutdown.clone()));
    };

    let mut sensor_control = None;
    if cli.role.runs(Role::Sensor) {
        let sensor = SensorWorker::new(ctx.clone(), SensorConfig::default());
        sensor_control = Some(sensor.control());
        let token = shutdown.clone();
        tasks.spawn(sensor.run(token));
    }

    if cli.role.runs(Role::Classifier) {
        let (stream, spec) = topology::classifier_consumer();
        spawn_loop(stream, spec, Arc::new(Classifier::new(ctx.clone())), &mut tasks);
    }

    if cli.role.runs(Role::Correlator) {
        let correlator = Correlator::new(ctx.clone());
        let _sweeper = correlator.spawn_sweeper(shutdown.clone());
        let (stream, spec) = topology::correlator_consumer();
        spawn_loop(stream, spec, Arc::new(correlator), &mut tasks);
    }

    if cli.role.runs(Role::Planner) {
        let (stream, spec) = topology::planner_consumer();
        spawn_loop(stream, spec, Arc::new(Planner::new(ctx.clone())), &mut tasks);
    }

    // The gateway needs a decision surface even when the authorizer's
    // consume loop runs elsewhere, so the instance always exists.
    let authorizer = Arc::new(Authorizer::new(ctx.clone()));
    if cli.role.runs(Role::Authorizer) {
        let _sweeper = authorizer.spawn_sweeper(shutdown.clone());
        let (stream, spec) = topology::authorizer_consumer();
        spawn_loop(
            stream,
            spec,
            Arc::clone(&authorizer) as Arc<dyn MessageHandler>,
            &mut tasks,
        );
    }

    if cli.role.runs(Role::Effector) {
        let mode = if cli.simulate_effects {
            ExecutionMode::Simulate
        } else {
            ExecutionMode::Live
        };
        let (stream, spec) = topology::effector_consumer();
        spawn_loop(
            stream,
            spec,
            Arc::new(Effector::new(ctx.clone()).with_mode(mode)),
            &mut tasks,
        );
    }

    if !cli.role.runs(Role::Gateway) {
        // Worker-only processes still expose liveness and counters.
        let metrics = Arc::clone(&ctx.metrics);
        let ops = axum::Router::new()
            .route(
                "/health",
                axum::routing::get(|| async { axum::Json(serde_json::json!({"status": "ok"})) }),
            )
            .route(
                "/metrics",
                axum::routing::get(move || {
                    let metrics = Arc::clone(&metrics);
                    async move { metrics.render_prometheus() }
                }),
            );
        let listener = tokio::net::TcpListener::bind(cli.http_addr).await?;
        info!(addr = %cli.http_addr, "ops listener bound");
        let token = shutdown.clone();
        tasks.spawn(async move {
            let serve = axum::serve(listener, ops)
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "ops server failed");
            }
        });
    }

    if cli.role.runs(Role::Gateway) {
        let hub = spawn_hub(
            Arc::clone(&ctx.broker),
            Arc::clone(&ctx.store),
            shutdown.clone(),
        );
        let state = AppState {
            store: Arc::clone(&ctx.store),
            broker: Arc::clone(&ctx.broker),
            authorizer: Arc::clone(&authorizer),
            sensor: sensor_control,
            metrics: Arc::clone(&ctx.metrics),
            hub,
            agent_id: agent_id.clone(),
        };

        let listener = tokio::net::TcpListener::bind(cli.http_addr).await?;
        info!(addr = %cli.http_addr, "gateway listening");
        let token = shutdown.clone();
        tasks.spawn(async move {
            let serve = axum::serve(listener, router(state))
                .with_graceful_shutdown(async move { token.cancelled().await });
            if let Err(e) = serve.await {
                error!(error = %e, "gateway server failed");
            }
        });
    }

    // Idle until shutdown, then drain every task.
    shutdown.cancelled().await;
    while tasks.join_next().await.is_some() {}
    info!("sentinel node stopped");
    guard.shutdown();
    Ok(())
}
