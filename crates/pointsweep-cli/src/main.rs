mod checkpoint;
mod crawl;
mod sink;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "pointsweep-cli")]
#[command(about = "Crawl point sites and publish a reconciled cashback campaign dataset")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Crawl the configured sites and publish the reconciled campaigns
    Crawl {
        /// Only crawl the site with this name
        #[arg(long)]
        site: Option<String>,
        /// Only crawl these category ids (repeatable)
        #[arg(long = "category")]
        categories: Vec<String>,
        /// Ignore the saved checkpoint and crawl every category again
        #[arg(long)]
        fresh: bool,
        /// Print which categories would be crawled and exit
        #[arg(long)]
        dry_run: bool,
    },
    /// List the site catalogue
    Sites,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = pointsweep_core::load_app_config()?;
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log_level.clone()))?;
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let sites = pointsweep_core::load_sites(&config.sites_path)?;

    match cli.command {
        Commands::Crawl {
            site,
            categories,
            fresh,
            dry_run,
        } => {
            let args = crawl::CrawlArgs {
                site,
                categories,
                fresh,
                dry_run,
            };
            crawl::run_crawl(&config, &sites, &args).await?;
        }
        Commands::Sites => crawl::print_sites(&sites),
    }

    Ok(())
}
