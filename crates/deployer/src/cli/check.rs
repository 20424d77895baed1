use anyhow::{bail, Context};
use futures::future::join_all;
use log::{error, info};
use ocrd_network::remote::{
    close_clients, Closable, ContainerClient, CredentialBundle, HasCredentials,
    RemoteConnectionFactory, RemoteSession, Transport,
};
use ocrd_network::ProcessingServerConfig;
use std::time::Duration;

/// One machine to check.
#[derive(Debug)]
pub(crate) struct CheckTarget {
    pub(crate) role: String,
    pub(crate) credentials: CredentialBundle,
    pub(crate) docker: bool,
}

/// Lists the machines of a config. The database and queue run as containers
/// on their hosts, so docker access is checked there too.
pub(crate) fn check_targets(config: &ProcessingServerConfig) -> Vec<CheckTarget> {
    let mut targets = vec![
        CheckTarget {
            role: "database".to_string(),
            credentials: config.mongo.credentials(),
            docker: true,
        },
        CheckTarget {
            role: "process_queue".to_string(),
            credentials: config.queue.credentials(),
            docker: true,
        },
    ];
    targets.extend(config.hosts.iter().enumerate().map(|(i, host)| CheckTarget {
        role: format!("hosts[{i}]"),
        credentials: host.credentials(),
        docker: host.has_docker_workers(),
    }));
    targets
}

pub(crate) async fn check_fleet<T: Transport>(
    factory: &RemoteConnectionFactory<T>,
    config: &ProcessingServerConfig,
    timeout: Duration,
) -> anyhow::Result<()> {
    let targets = check_targets(config);

    let mut failed = 0;
    for (target, outcome) in run_checks(factory, &targets, timeout).await {
        let address = target.credentials.address.as_deref().unwrap_or("<no address>");
        match outcome {
            Ok(summary) => info!("{} ({address}): {summary}", target.role),
            Err(e) => {
                failed += 1;
                error!("{} ({address}): {e:#}", target.role);
            }
        }
    }

    if failed > 0 {
        bail!("{failed} of {} host(s) failed the check", targets.len());
    }
    info!("All {} host(s) reachable", targets.len());
    Ok(())
}

/// Checks all targets concurrently, each under its own deadline.
async fn run_checks<'a, T: Transport>(
    factory: &RemoteConnectionFactory<T>,
    targets: &'a [CheckTarget],
    timeout: Duration,
) -> Vec<(&'a CheckTarget, anyhow::Result<String>)> {
    let checks = targets.iter().map(|target| async move {
        let outcome = match tokio::time::timeout(timeout, check_target(factory, target)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow::anyhow!("timed out after {}s", timeout.as_secs())),
        };
        (target, outcome)
    });
    join_all(checks).await
}

async fn check_target<T: Transport>(
    factory: &RemoteConnectionFactory<T>,
    target: &CheckTarget,
) -> anyhow::Result<String> {
    let mut shell = factory
        .shell(&target.credentials)
        .await
        .context("failed to open shell")?;
    let mut docker = None;

    let outcome = inspect_target(factory, target, &shell, &mut docker).await;

    let mut clients: [&mut dyn Closable; 2] = [&mut shell, &mut docker];
    close_clients(&mut clients).await;
    outcome
}

async fn inspect_target<T: Transport>(
    factory: &RemoteConnectionFactory<T>,
    target: &CheckTarget,
    shell: &T::Session,
    docker: &mut Option<ContainerClient<T::Session>>,
) -> anyhow::Result<String> {
    let uname = shell
        .exec_checked("uname -a")
        .await
        .context("`uname -a` failed")?;
    let mut summary = uname.stdout_lossy().trim().to_string();

    if target.docker {
        let client = docker.insert(
            factory
                .container_client(&target.credentials)
                .await
                .context("failed to open container client")?,
        );
        client.docker().ping().await.context("docker ping failed")?;
        let version = client
            .docker()
            .version()
            .await
            .context("docker version failed")?;
        summary.push_str(&format!(
            "; docker {}",
            version.version.as_deref().unwrap_or("unknown")
        ));
    }
    Ok(summary)
}
