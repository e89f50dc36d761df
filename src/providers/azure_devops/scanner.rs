use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::{info, warn};
use serde_json::Value;

use crate::auth::Token;
use crate::config::Config;
use crate::error::{Result, ScanError};
use crate::output::PhaseProgress;

use super::accounts::build_service_accounts;
use super::checks::attach_checks;
use super::classify::classify;
use super::client::AzureDevOpsClient;
use super::commits::{attach_repository_committers, collect_commits, committer_stats};
use super::inventory::{default_descriptors, Inventory, InventoryCrawler};
use super::links::WebLinks;
use super::permissions::PermissionResolver;
use super::pipelines::{list_tasks, BranchSelection, PipelineDiscovery};
use super::projects::{collect_general_settings, discover_projects, ProjectTable};
use super::reverse_index::attach_resource_permissions;
use super::stats::{enrich_stats, language_metrics, ProjectStats};
use super::types::{Build, BuildServiceAccount, Commit, CommitterStats, PipelineDefinition};

const PHASES: usize = 6;

/// Inputs of one scan run.
#[derive(Debug, Clone, Default)]
pub struct ScanParameters {
    pub organization: String,
    pub job_id: String,
    pub token: Option<Token>,
    /// Project names or ids to restrict the scan to; empty scans every project.
    pub project_filter: Vec<String>,
    pub top_branches: i64,
}

impl ScanParameters {
    /// Fails on the first missing required parameter.
    pub fn validate(&self) -> Result<()> {
        if self.organization.trim().is_empty() {
            return Err(ScanError::MissingParameter("organization"));
        }
        if self.job_id.trim().is_empty() {
            return Err(ScanError::MissingParameter("job id"));
        }
        if self.token.as_ref().map_or(true, Token::is_empty) {
            return Err(ScanError::MissingParameter("personal access token"));
        }
        Ok(())
    }
}

/// Everything one scan pass collected, ready to be written out.
#[derive(Debug)]
pub struct ScanResult {
    pub organization: String,
    pub organization_url: String,
    pub project_filter: Vec<String>,
    pub scan_start: DateTime<Utc>,
    pub scan_end: DateTime<Utc>,
    pub projects: ProjectTable,
    pub stats: IndexMap<String, ProjectStats>,
    pub inventory: Inventory,
    pub definitions: Vec<PipelineDefinition>,
    pub builds: Vec<Build>,
    pub tasks: Vec<Value>,
    pub commits: Vec<Commit>,
    pub committer_stats: IndexMap<String, CommitterStats>,
    pub build_service_accounts: Vec<BuildServiceAccount>,
    pub artifacts: Vec<Value>,
}

/// Azure DevOps security posture scanner.
///
/// Runs every stage one after another against a single organization and
/// assembles the results in memory.
pub struct AzureDevOpsScanner {
    client: AzureDevOpsClient,
    links: WebLinks,
    config: Config,
    params: ScanParameters,
}

impl AzureDevOpsScanner {
    /// # Errors
    ///
    /// Returns [`ScanError::MissingParameter`] before any request is made when the
    /// organization, job id or token is missing, and [`ScanError::Config`] for
    /// unusable base URLs.
    pub fn new(config: Config, params: ScanParameters) -> Result<Self> {
        params.validate()?;
        let token = params
            .token
            .clone()
            .ok_or(ScanError::MissingParameter("personal access token"))?;
        let client = AzureDevOpsClient::new(&config.azure_devops, &params.organization, token)?;
        let links = WebLinks::new(&config.azure_devops.api_base_url, &params.organization)?;

        Ok(Self {
            client,
            links,
            config,
            params,
        })
    }

    pub fn job_id(&self) -> &str {
        &self.params.job_id
    }

    /// Runs a full scan.
    ///
    /// Only project discovery is fatal. Every later stage logs what it could not
    /// read and carries on with what it has.
    pub async fn scan(&self) -> Result<ScanResult> {
        let scan_start = Utc::now();
        let organization = self.client.organization();
        info!("Starting scan for {organization} with job ID: {}", self.params.job_id);

        let progress = PhaseProgress::start(PHASES, "Discovering projects");
        let mut projects = discover_projects(&self.client, &self.params.project_filter).await?;
        collect_general_settings(
            &self.client,
            &mut projects,
            &self.config.scan.build_settings_expectations,
        )
        .await;
        let mut stats = language_metrics(&self.client, &projects).await;
        let tasks = list_tasks(&self.client).await.unwrap_or_else(|e| {
            warn!("Could not list tasks: {e}");
            Vec::new()
        });
        info!("Discovered {} projects", projects.len());

        let progress = progress.advance("Discovering pipelines");
        let discovery = PipelineDiscovery::new(
            &self.client,
            &projects,
            BranchSelection::from_top_branches(self.params.top_branches),
        );
        let catalog = discovery.discover().await;
        let mut definitions = catalog.definitions;
        let builds = catalog.builds;
        discovery.attach_authorized_resources(&mut definitions).await;
        let artifacts = discovery.collect_artifacts(&builds).await;
        info!(
            "Discovered {} pipelines, {} builds and {} artifacts",
            definitions.len(),
            builds.len(),
            artifacts.len()
        );

        let progress = progress.advance("Crawling protected resources");
        let descriptors = default_descriptors();
        let mut inventory = Inventory::new(&descriptors);
        let crawler = InventoryCrawler::new(&self.client, &projects, &self.links);
        crawler.crawl(&mut inventory, &descriptors).await;
        crawler
            .enrich_repositories(&mut inventory, self.config.azure_devops.page_size, scan_start)
            .await;
        attach_checks(&self.client, &mut inventory).await;

        let progress = progress.advance("Resolving pipeline permissions");
        PermissionResolver::new(&self.client, &projects, &definitions, &builds)
            .resolve(&mut inventory)
            .await;
        inventory.merge_pools();
        classify(&mut inventory);
        attach_resource_permissions(&mut definitions, &inventory);

        let progress = progress.advance("Collecting commits");
        let build_service_accounts = build_service_accounts(&self.client).await.unwrap_or_else(|e| {
            warn!("Could not list build service accounts: {e}");
            Vec::new()
        });
        let commits = collect_commits(
            &self.client,
            &inventory,
            self.config.azure_devops.commit_lookback_days,
            self.config.azure_devops.page_size,
            scan_start,
        )
        .await;
        let committer_stats = committer_stats(&commits, &build_service_accounts);
        attach_repository_committers(&mut inventory, &commits);

        let progress = progress.advance("Enriching stats");
        enrich_stats(&mut stats, &inventory, &definitions, &builds, &commits, &artifacts);
        progress.finish();

        info!("Scan of {organization} finished");
        Ok(ScanResult {
            organization: organization.to_string(),
            organization_url: self.links.organization(),
            project_filter: self.params.project_filter.clone(),
            scan_start,
            scan_end: Utc::now(),
            projects,
            stats,
            inventory,
            definitions,
            builds,
            tasks,
            commits,
            committer_stats,
            build_service_accounts,
            artifacts,
        })
    }
}
