//! Branch Promoter CLI
//!
//! Promotes the configured development branch into production and pushes it.

use branch_promoter::config::CONFIG_ENV_VAR;
use branch_promoter::{promote, Error, GitCli, MergeOutcome, PromoteConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 {
        eprintln!("Usage: {}", args[0]);
        eprintln!("\nMerges the development branch into production and pushes it.");
        eprintln!("\nConfiguration is read from ~/.promote/config.toml.");
        eprintln!("\nEnvironment variables:");
        eprintln!("  {}=<path>  Use a different config file", CONFIG_ENV_VAR);
        std::process::exit(2);
    }

    let config = match PromoteConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    tracing::info!(
        dev = ?config.dev_path,
        prod = ?config.prod_path,
        dev_branch = %config.dev_branch,
        prod_branch = %config.prod_branch,
        "starting promotion"
    );

    match promote(GitCli::new(), &config).await {
        Ok(report) => match report.merge {
            MergeOutcome::Merged { commit } => {
                println!(
                    "Promoted {} into {} (merge commit {}) and pushed to {}",
                    config.dev_branch, config.prod_branch, commit, config.remote
                );
            }
            MergeOutcome::AlreadyUpToDate => {
                println!(
                    "{} already contains {}; nothing to promote",
                    config.prod_branch, config.dev_branch
                );
            }
        },
        Err(Error::Promote(e)) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    }
}
