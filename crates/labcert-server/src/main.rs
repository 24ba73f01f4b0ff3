#![forbid(unsafe_code)]

use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};
use labcert_core::{Lab, NewStaffMember, Role};
use labcert_server::{build_router, ApiConfig, AppState, TokenCodec};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "labcert-server", version, about = "Lab sample certification API")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the HTTP API (default)
    Serve,
    /// Print a signed bearer token
    MintToken {
        user_id: i64,
        name: String,
        /// Comma-separated roles: data_entry, evaluator, validator
        roles: String,
    },
    /// Create the demo data entry, evaluator and validator accounts
    SeedStaff,
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("register SIGTERM");
        let mut sigint = signal(SignalKind::interrupt()).expect("register SIGINT");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn init_tracing(log_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

fn parse_roles(raw: &str) -> anyhow::Result<Vec<Role>> {
    let roles = raw
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(|r| Role::parse(r).with_context(|| format!("unknown role '{r}'")))
        .collect::<anyhow::Result<Vec<_>>>()?;
    anyhow::ensure!(!roles.is_empty(), "at least one role is required");
    Ok(roles)
}

fn open_lab(config: &ApiConfig) -> anyhow::Result<Lab> {
    if let Some(dir) = config.db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating database directory {}", dir.display()))?;
    }
    Lab::open(&config.db_path, config.lab_config())
        .with_context(|| format!("opening database {}", config.db_path.display()))
}

fn seed_staff(lab: &Lab) -> anyhow::Result<()> {
    let demo = [
        ("Registrar", "registrar@example.com", Role::DataEntry),
        ("Evaluator", "evaluator@example.com", Role::Evaluator),
        ("Validator", "validator@example.com", Role::Validator),
    ];
    for (name, email, role) in demo {
        let member = lab.ensure_staff(&NewStaffMember {
            name: name.to_string(),
            email: email.to_string(),
            roles: vec![role],
        })?;
        println!("{}\t{}\t{}", member.id, member.email, role.as_str());
    }
    Ok(())
}

async fn serve(config: ApiConfig) -> anyhow::Result<()> {
    let lab = open_lab(&config)?;
    if !Path::new(&config.files_dir).is_dir() {
        tracing::warn!(
            files_dir = %config.files_dir.display(),
            "legacy report directory does not exist"
        );
    }
    let bind = config.bind.clone();
    let app = build_router(AppState::new(lab, config));

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!("labcert-server listening on {bind}");
    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await
        .context("server failed")?;
    info!("labcert-server stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ApiConfig::from_env();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            init_tracing(config.log_json);
            config.validate()?;
            serve(config).await
        }
        Command::MintToken {
            user_id,
            name,
            roles,
        } => {
            config.validate()?;
            let codec = TokenCodec::new(config.token_secret.as_bytes(), config.token_ttl_secs);
            println!("{}", codec.issue(user_id, &name, &parse_roles(&roles)?)?);
            Ok(())
        }
        Command::SeedStaff => {
            init_tracing(config.log_json);
            seed_staff(&open_lab(&config)?)
        }
    }
}
