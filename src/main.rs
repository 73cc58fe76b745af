use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rocket_ci::{api, ci::Ci, config::CiConfig, models::BuildStatus};

#[derive(Parser)]
#[command(name = "rocket-ci")]
#[command(about = "Self-hosted continuous integration for Go projects")]
struct Cli {
    /// Directory containing `<project>.git` clones
    #[arg(short, long, global = true)]
    dir: Option<PathBuf>,

    /// Log to stderr instead of stdout
    #[arg(long, global = true)]
    log_stderr: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Listen address
        #[arg(short, long, default_value = "127.0.0.1:8080")]
        addr: String,
    },
    /// Build one reference in the foreground and print its summary
    Build {
        project: String,
        reference: String,
    },
}

/// Initialize tracing with output to stderr or stdout
fn init_tracing(use_stderr: bool) {
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "rocket_ci=debug,tower_http=debug".into()),
    );

    if use_stderr {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn serve(ci: Ci, addr: &str) -> anyhow::Result<()> {
    tracing::info!("Serving projects from {}", ci.config().root.display());

    let app = api::create_router(ci);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("RocketCI server listening on http://{}", addr);

    axum::serve(listener, app).await?;
    Ok(())
}

async fn build_once(ci: Ci, project: &str, reference: &str) -> anyhow::Result<bool> {
    let project = ci.project(project).await?;
    let resolved = project.resolve(reference).await?;
    let build = project.get_build(&resolved.id).await?;

    build.start_build();
    let status = build.wait().await;

    println!("{}", serde_json::to_string_pretty(&build.summary())?);
    Ok(status == BuildStatus::Finished)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // The build command prints JSON on stdout
    let use_stderr = cli.log_stderr || matches!(cli.command, Some(Commands::Build { .. }));
    init_tracing(use_stderr);

    let mut config = CiConfig::from_env()?;
    if let Some(dir) = cli.dir {
        config = config.with_root(dir);
    }
    let ci = Ci::new(config);

    match cli.command {
        Some(Commands::Serve { addr }) => serve(ci, &addr).await?,
        Some(Commands::Build { project, reference }) => {
            if !build_once(ci, &project, &reference).await? {
                std::process::exit(1);
            }
        }
        None => serve(ci, "127.0.0.1:8080").await?,
    }

    Ok(())
}
