use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::signal;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use policy_operator::health::{HealthState, run_health_server};
use policy_operator::resources::certificate::RcgenGenerator;
use policy_operator::{
    AdmissionPolicy, ClusterAdmissionPolicy, Context, KubeStore, OperatorConfig, PolicyIndex,
    policy_reflector, run_admission_policy_controller, run_cluster_admission_policy_controller,
    run_policy_server_controller, run_webhook_server,
};

/// Time left to in-flight reconciles once a shutdown signal arrives
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Spawn a long-running task whose exit ends the process
fn spawn_named<F>(tasks: &mut JoinSet<&'static str>, name: &'static str, task: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tasks.spawn(async move {
        task.await;
        name
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
        && rustls::crypto::CryptoProvider::get_default().is_none()
    {
        return Err("no rustls crypto provider available".into());
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("policy_operator=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .init();

    let config = OperatorConfig::from_env();
    info!(
        namespace = %config.deployments_namespace,
        metrics_enabled = config.metrics_enabled,
        "Starting policy-operator"
    );

    let client = Client::try_default().await?;
    let health = Arc::new(HealthState::new());
    let mut tasks = JoinSet::new();

    let state = health.clone();
    spawn_named(&mut tasks, "health server", async move {
        if let Err(e) = run_health_server(state).await {
            error!("Health server error: {}", e);
        }
    });

    let (cluster_policies, watch) = policy_reflector::<ClusterAdmissionPolicy>(client.clone());
    spawn_named(&mut tasks, "ClusterAdmissionPolicy reflector", watch);
    let (policies, watch) = policy_reflector::<AdmissionPolicy>(client.clone());
    spawn_named(&mut tasks, "AdmissionPolicy reflector", watch);

    let index = PolicyIndex::new(cluster_policies, policies);
    index.wait_until_ready().await?;
    info!("Policy caches synced");

    let store = Arc::new(KubeStore::new(
        client.clone(),
        config.deployments_namespace.clone(),
        index,
    ));
    let ctx = Arc::new(
        Context::new(store, Arc::new(RcgenGenerator), config.clone())
            .with_health_state(health.clone()),
    );

    let (cert_path, key_path) = (config.webhook_cert_path, config.webhook_key_path);
    if Path::new(&cert_path).exists() && Path::new(&key_path).exists() {
        spawn_named(&mut tasks, "admission webhook server", async move {
            if let Err(e) = run_webhook_server(&cert_path, &key_path).await {
                error!("Webhook server error: {}", e);
            }
        });
    } else {
        warn!(
            cert = %cert_path,
            key = %key_path,
            "Serving certificate not mounted, admission validation disabled"
        );
    }

    spawn_named(
        &mut tasks,
        "PolicyServer controller",
        run_policy_server_controller(client.clone(), ctx.clone()),
    );
    spawn_named(
        &mut tasks,
        "ClusterAdmissionPolicy controller",
        run_cluster_admission_policy_controller(client.clone(), ctx.clone()),
    );
    spawn_named(
        &mut tasks,
        "AdmissionPolicy controller",
        run_admission_policy_controller(client, ctx),
    );

    health.set_ready(true);

    tokio::select! {
        Some(exited) = tasks.join_next() => match exited {
            Ok(name) => error!("{} exited unexpectedly", name),
            Err(e) => error!("Task panicked: {}", e),
        },
        _ = shutdown_signal() => {
            health.set_ready(false);
            info!(
                grace_secs = SHUTDOWN_GRACE_PERIOD.as_secs(),
                "Shutdown requested, draining in-flight reconciles"
            );
            tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
        }
    }

    tasks.shutdown().await;
    info!("Operator stopped");
    Ok(())
}

/// Resolve on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
