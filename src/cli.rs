use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use log::info;
use std::path::PathBuf;

use crate::auth::Token;
use crate::config::Config;
use crate::output::{self, bright_green};
use crate::providers::{AzureDevOpsScanner, ScanParameters};
use crate::report::ScanReport;

#[derive(Parser)]
#[command(name = "adoscan")]
#[command(author, version, about = "Azure DevOps Authorization & Exposure Scanner", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to ./adoscan.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Pretty-print the result document
    #[arg(long, global = true, default_value_t = false)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan an organization and write `scan_<job id>.json`
    Scan(ScanArgs),
}

#[derive(Args, Debug)]
struct ScanArgs {
    /// Azure DevOps organization name
    #[arg(short, long)]
    organization: String,

    /// Job ID for this scan, used in the result file name
    #[arg(short, long)]
    job_id: String,

    /// Personal access token
    #[arg(short, long, env = "AZURE_DEVOPS_PAT", hide_env_values = true)]
    pat_token: Option<String>,

    /// Directory to save scan results (default: current working directory)
    #[arg(short, long)]
    results_dir: Option<PathBuf>,

    /// Branches previewed per pipeline: -1 all, 0 default branch only, N top N plus default
    #[arg(long, allow_negative_numbers = true)]
    top_branches: Option<i64>,

    /// Comma separated project names or IDs to restrict the scan to
    #[arg(long, value_delimiter = ',')]
    projects: Vec<String>,
}

impl ScanArgs {
    fn project_filter(&self) -> Vec<String> {
        self.projects
            .iter()
            .map(|project| project.trim())
            .filter(|project| !project.is_empty())
            .map(str::to_string)
            .collect()
    }
}

impl Cli {
    async fn execute_scan(&self, args: &ScanArgs, mut config: Config) -> Result<()> {
        info!("Scanning Azure DevOps organization: {}", args.organization);

        if let Some(top_branches) = args.top_branches {
            config.scan.top_branches = top_branches;
        }
        let results_dir = match args.results_dir.clone().or_else(|| config.output.results_dir.clone()) {
            Some(dir) => dir,
            None => std::env::current_dir()?,
        };
        let pretty = self.pretty || config.output.pretty;

        let params = ScanParameters {
            organization: args.organization.clone(),
            job_id: args.job_id.clone(),
            token: args.pat_token.as_deref().map(Token::from),
            project_filter: args.project_filter(),
            top_branches: config.scan.top_branches,
        };

        let scanner = AzureDevOpsScanner::new(config, params)?;
        let result = scanner.scan().await?;

        let path = ScanReport::new(&result).write(&results_dir, scanner.job_id(), pretty)?;
        eprintln!(
            "{}",
            bright_green(format!("Scan completed successfully. Results file saved to {}", path.display()))
        );
        output::print_summary(&result, &path);

        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        let config = Config::load(self.config.as_deref())?;
        match &self.command {
            Commands::Scan(args) => self.execute_scan(args, config).await,
        }
    }
}
