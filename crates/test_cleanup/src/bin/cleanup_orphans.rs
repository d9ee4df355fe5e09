//! Removes provisioned test containers that outlived their expiration.
//!
//! Usage:
//!   cleanup-orphans [--max-age-minutes N] [--context NAME] [--dry-run]
//!
//! The container runtime is found through `DOCKER_HOST` or the local socket.

use anyhow::Context;
use clap::Parser;
use provisioner::RuntimeHandle;
use test_cleanup::{CleanupReport, ContainerCleanup};

#[derive(Debug, Parser)]
#[command(name = "cleanup-orphans", about = "Remove expired test containers")]
struct Args {
    /// Age after which containers without an expiration label are removed.
    #[arg(long, default_value_t = 60, value_parser = clap::value_parser!(u32).range(1..))]
    max_age_minutes: u32,

    /// Remove every container from this workflow context (e.g. `pr123`)
    /// instead of only expired ones.
    #[arg(long)]
    context: Option<String>,

    /// List what would be removed without removing anything.
    #[arg(long)]
    dry_run: bool,
}

impl Args {
    fn max_age(&self) -> chrono::Duration {
        chrono::Duration::minutes(i64::from(self.max_age_minutes))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    test_cleanup::init_logging();
    let args = Args::parse();

    println!("🧹 Test Container Cleanup");
    println!("=========================");
    println!();

    let runtime = RuntimeHandle::ensure(None)
        .await
        .context("Failed to connect to the container runtime")?;
    let cleanup = ContainerCleanup::new(runtime).dry_run(args.dry_run);

    let report = match &args.context {
        Some(context) => {
            println!("🔍 Searching for containers from context '{}'...", context);
            cleanup.cleanup_context(context).await?
        }
        None => {
            println!(
                "🔍 Searching for expired containers (max age {} minutes)...",
                args.max_age_minutes
            );
            cleanup
                .cleanup_expired(args.max_age())
                .await?
        }
    };

    print_report(&report, args.dry_run);

    if !report.failed.is_empty() {
        anyhow::bail!("{} container(s) could not be removed", report.failed.len());
    }
    Ok(())
}

fn print_report(report: &CleanupReport, dry_run: bool) {
    println!();
    if dry_run {
        println!("📋 Dry run: {} container(s) would be removed", report.removed.len());
    } else {
        println!("✅ Cleanup completed!");
        println!("   Removed {} container(s)", report.removed.len());
    }
    for name in &report.removed {
        println!("   - {}", name);
    }

    if !report.failed.is_empty() {
        println!();
        println!("❌ Failed:");
        for (name, reason) in &report.failed {
            println!("   - {}: {}", name, reason);
        }
    }
}
