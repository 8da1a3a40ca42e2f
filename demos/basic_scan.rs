//! Basic scan example demonstrating strategy selection and concurrent scans.
//!
//! This example shows how to:
//! - Pick an install strategy from preferences
//! - Build a ScanExecutionCoordinator
//! - Scan several targets and inspect the outcomes
//!
//! Run with: cargo run --example basic_scan -- <target-dir>...
//!
//! Set `SCANJOB_SERVER_URL` (and `SCANJOB_API_TOKEN`) to install from a
//! server, `SCANJOB_DOWNLOAD_URL` to install from a URL, or
//! `SCANJOB_SCANNER_PATH` to use an existing scanner.

use scanjob::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    println!("=== Scanjob Basic Scan Example ===\n");

    let env = EnvironmentVariables::from_system();

    let mut preferences = InstallPreferences::new().with_offline(env.contains("SCANJOB_OFFLINE"));
    if let Some(path) = env.get_non_blank(scanjob::core::SCANNER_PATH_VAR) {
        preferences = preferences.with_local_scanner_path(path);
    }
    if let Some(url) = env.get_non_blank("SCANJOB_DOWNLOAD_URL") {
        preferences = preferences.with_user_url(url);
    }
    if let Some(url) = env.get_non_blank("SCANJOB_SERVER_URL") {
        let token = env.get("SCANJOB_API_TOKEN").unwrap_or_default();
        preferences = preferences.with_server(ServerConfig::parse(url, Credentials::api_token(token))?);
    }

    let strategy = InstallStrategy::select(&preferences)?;
    println!("Install strategy: {}", strategy.name());

    let pool = WorkerPool::with_default_capacity()?;
    let coordinator = InstallationOrchestrator::new().build(&strategy, &pool, &env)?;

    println!("Install directory: {}", coordinator.paths().install_directory.display());
    println!("Worker pool capacity: {}", pool.capacity());

    // Install (or verify) up front so failures are reported once
    let artifact = coordinator.ensure_installed().await?;
    println!(
        "Scanner ready: {} (version {})",
        artifact.executable_path.display(),
        artifact.version.as_deref().unwrap_or("unknown")
    );

    let targets: Vec<ScanTarget> = std::env::args()
        .skip(1)
        .map(|dir| ScanTarget::new(dir.clone()).with_argument(format!("--dir={}", dir)))
        .collect();
    if targets.is_empty() {
        println!("\nNo targets given, nothing to scan.");
        return Ok(());
    }

    println!("\n=== Scan Results ===");
    for outcome in coordinator.run_all(targets).await {
        match &outcome.status {
            ScanStatus::Succeeded => println!("✅ {} succeeded in {:?}", outcome.target, outcome.duration),
            ScanStatus::Failed => println!("❌ {} exited with {:?}", outcome.target, outcome.exit_code),
            ScanStatus::LaunchFailed { reason } | ScanStatus::NotStarted { reason } => {
                println!("💥 {} did not run: {}", outcome.target, reason)
            }
            other => println!("⚠️ {}: {}", outcome.target, other),
        }
        if let Some(dir) = &outcome.output_directory {
            println!("   logs: {}", dir.display());
        }
    }

    println!("\n=== Example Complete ===");
    Ok(())
}
