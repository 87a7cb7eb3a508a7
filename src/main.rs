use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hook_relay::actions::ActionDispatcher;
use hook_relay::config::Settings;
use hook_relay::debounce::DEFAULT_WINDOW;
use hook_relay::pipeline::Pipeline;
use hook_relay::report::{drain, Notifier, Reporter};
use hook_relay::rungroup::{Scheduler, DEFAULT_GRACE};
use hook_relay::server::{build_router, AppState};
use hook_relay::shorten::UrlShortener;

#[derive(Parser)]
#[command(name = "hook-relay", about = "GitHub/GitLab webhook relay")]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(long)]
    config: PathBuf,
}

/// Stand-in collaborator: logs notifications until a chat backend is
/// wired up.
struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, target: &str, text: &str) {
        info!(recipient = target, "{text}");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hook_relay=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("{error}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load(&args.config)?;

    let (reporter, notifications) = Reporter::new(
        settings.channels,
        settings.confidential_channels,
        settings.report_users,
    );
    tokio::spawn(drain(notifications, LogNotifier));

    let scheduler = Scheduler::new(settings.rungroup_policies, DEFAULT_GRACE, reporter.clone());
    let shortener = settings
        .shortener
        .map(UrlShortener::new)
        .transpose()?
        .map(Arc::new);
    let dispatcher = ActionDispatcher::new(settings.actions, scheduler, shortener, reporter.clone());
    let pipeline = Pipeline::new(
        settings.filter_rules,
        settings.router,
        dispatcher,
        reporter,
        settings.prevent_flood.then_some(DEFAULT_WINDOW),
    );

    let state = AppState::new(
        pipeline,
        settings.github_secret.map(String::into_bytes),
        settings.gitlab_secret,
    );
    let app = build_router(state);

    match settings.tls {
        Some(tls) => {
            let rustls = axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await?;
            info!(addr = %settings.listen, "listening for webhooks over https");
            axum_server::bind_rustls(settings.listen, rustls)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(settings.listen).await?;
            info!(addr = %settings.listen, "listening for webhooks");
            axum::serve(listener, app).await?;
        }
    }
    Ok(())
}
