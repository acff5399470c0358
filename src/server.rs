use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::rest::{self, AppState, Credentials};
use crate::api::tasks::BackgroundTasks;
use crate::cluster::azure::ArmCredentials;
use crate::cluster::Authenticator;
use crate::config::Settings;
use crate::controller::Controller;
use crate::lock::LeaseTable;
use crate::receiver::{ProviderKind, ReceiverRegistry};
use crate::release::helm::Helm;
use crate::release::install::HelmInstaller;
use crate::vcs::gitlab::GitLab;

const HTTP_TIMEOUT: Duration = Duration::from_secs(60);

pub fn init_tracing(log_level: &str, log_format: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if log_format == "pretty" {
        builder.pretty().init();
    } else {
        builder.json().init();
    }
}

pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .user_agent(concat!("sparrow/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("building HTTP client")
}

pub fn helm_installer(http: reqwest::Client, settings: &Settings) -> HelmInstaller {
    HelmInstaller::new(
        http,
        settings.helm.version.clone(),
        settings.helm.bin_path.clone(),
        settings.workspace.helm_download_dir.clone(),
        settings.helm.auto_install,
    )
}

pub async fn run(settings: Settings) -> Result<()> {
    init_tracing(&settings.log_level, &settings.log_format);
    info!(version = env!("CARGO_PKG_VERSION"), "Sparrow starting");

    let provider = ProviderKind::from_base_url(&settings.vcs.base_url).with_context(|| {
        format!(
            "no webhook receiver for source control at {}",
            settings.vcs.base_url
        )
    })?;
    let receiver = ReceiverRegistry::new()
        .get(provider)
        .with_context(|| format!("no receiver registered for {provider}"))?;

    let http = http_client()?;

    let helm_bin = helm_installer(http.clone(), &settings)
        .ensure()
        .await
        .context("preparing helm")?;
    info!(path = %helm_bin.display(), version = %settings.helm.version, "helm ready");

    let lock_timeout = Duration::from_secs(settings.locking.timeout_secs);
    let vcs = Arc::new(GitLab::new(
        http.clone(),
        &settings.vcs.base_url,
        settings.vcs.token.clone(),
        settings.workspace.clone_dir.clone(),
        lock_timeout,
    ));
    let releases = Arc::new(Helm::new(
        helm_bin,
        settings.helm.diff_context,
        settings.helm.apply_dry_run,
    ));
    let auth = Arc::new(Authenticator::new(
        settings.workspace.kubeconfig_dir.clone(),
        Arc::new(ArmCredentials::new(http, settings.azure.clone())),
        lock_timeout,
    ));
    let controller = Controller::new(
        vcs,
        releases,
        auth,
        LeaseTable::new(lock_timeout),
        settings.sparrowfile_name.clone(),
    );

    let basic_auth = settings.basic_auth.enabled.then(|| Credentials {
        username: settings.basic_auth.username.clone(),
        password: settings.basic_auth.password.clone(),
    });
    let tasks = BackgroundTasks::new();
    let state = AppState {
        controller: Arc::new(controller),
        provider,
        receiver,
        basic_auth,
        tasks: tasks.clone(),
    };

    let prefix = settings.route_prefix();
    let app = rest::router(state, &prefix).layer(TraceLayer::new_for_http());

    let http_addr = &settings.http_addr;
    let listener = TcpListener::bind(http_addr)
        .await
        .with_context(|| format!("binding to {}", http_addr))?;

    info!(addr = %http_addr, prefix = %prefix, %provider, "HTTP server listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    tasks
        .drain(Duration::from_secs(settings.shutdown_grace_secs))
        .await;
    info!("Sparrow stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("Received Ctrl+C, shutting down"); },
        _ = terminate => { info!("Received SIGTERM, shutting down"); },
    }
}
