use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::info;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::providers::azure_devops::{
    Build, BuildServiceAccount, Commit, CommitterStats, Inventory, PipelineDefinition,
    ProjectStats, ProjectTable, ResourceType, ScanResult,
};

pub const SCANNER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// The result document of one scan, borrowed from a [`ScanResult`].
#[derive(Debug, Serialize)]
pub struct ScanReport<'a> {
    pub scanner_version: &'static str,
    pub id: &'a str,
    pub scan_start: DateTime<Utc>,
    pub scan_end: DateTime<Utc>,
    pub organisation: Organisation<'a>,
    pub stats: &'a IndexMap<String, ProjectStats>,
    pub projects: &'a ProjectTable,
    pub protected_resources: &'a Inventory,
    pub build_definitions: &'a [PipelineDefinition],
    pub builds: &'a [Build],
    pub tasks: &'a [Value],
    pub commits: &'a [Commit],
    pub committer_stats: &'a IndexMap<String, CommitterStats>,
    pub build_service_accounts: &'a [BuildServiceAccount],
    pub artifacts: &'a [Value],
}

#[derive(Debug, Serialize)]
pub struct Organisation<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub url: &'a str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub owner: &'static str,
    pub partial_scan: bool,
    pub projects_filter: &'a [String],
    #[serde(rename = "projectRefs")]
    pub project_refs: Vec<OrganisationProjectRef<'a>>,
    pub resource_counts: OrganisationCounts,
}

#[derive(Debug, Serialize)]
pub struct OrganisationProjectRef<'a> {
    pub id: &'a str,
    pub name: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OrganisationCounts {
    pub projects: usize,
    pub pools: usize,
    pub queue: usize,
    pub endpoint: usize,
    pub variablegroup: usize,
    pub securefile: usize,
    pub repository: usize,
    pub environment: usize,
    pub deploymentgroup: usize,
    pub pipelines: usize,
    pub builds: usize,
    pub commits: usize,
    pub committers: usize,
}

impl<'a> ScanReport<'a> {
    pub fn new(result: &'a ScanResult) -> Self {
        let inventory = &result.inventory;
        let resource_counts = OrganisationCounts {
            projects: result.projects.len(),
            pools: inventory.count(ResourceType::Pool),
            queue: inventory.count(ResourceType::Queue),
            endpoint: inventory.count(ResourceType::Endpoint),
            variablegroup: inventory.count(ResourceType::VariableGroup),
            securefile: inventory.count(ResourceType::SecureFile),
            repository: inventory.count(ResourceType::Repository),
            environment: inventory.count(ResourceType::Environment),
            deploymentgroup: inventory.count(ResourceType::DeploymentGroup),
            pipelines: result.definitions.len(),
            builds: result.builds.len(),
            commits: result.commits.len(),
            committers: result.committer_stats.len(),
        };

        Self {
            scanner_version: SCANNER_VERSION,
            id: &result.organization,
            scan_start: result.scan_start,
            scan_end: result.scan_end,
            organisation: Organisation {
                id: &result.organization,
                name: &result.organization,
                url: &result.organization_url,
                kind: "AzureDevOps",
                owner: "unknown",
                partial_scan: !result.project_filter.is_empty(),
                projects_filter: &result.project_filter,
                project_refs: result
                    .projects
                    .iter()
                    .map(|project| OrganisationProjectRef {
                        id: &project.id,
                        name: &project.name,
                    })
                    .collect(),
                resource_counts,
            },
            stats: &result.stats,
            projects: &result.projects,
            protected_resources: inventory,
            build_definitions: &result.definitions,
            builds: &result.builds,
            tasks: &result.tasks,
            commits: &result.commits,
            committer_stats: &result.committer_stats,
            build_service_accounts: &result.build_service_accounts,
            artifacts: &result.artifacts,
        }
    }

    /// Writes the document to `<results_dir>/scan_<job id>.json`.
    ///
    /// The file is written next to its destination first and renamed into place,
    /// so readers never see a partial document.
    pub fn write(&self, results_dir: &Path, job_id: &str, pretty: bool) -> Result<PathBuf> {
        fs::create_dir_all(results_dir)?;
        let path = results_dir.join(format!("scan_{}.json", sanitize_job_id(job_id)));
        let staging = path.with_extension("json.tmp");

        let contents = if pretty {
            serde_json::to_vec_pretty(self)?
        } else {
            serde_json::to_vec(self)?
        };
        fs::write(&staging, contents)?;
        if let Err(e) = fs::rename(&staging, &path) {
            let _ = fs::remove_file(&staging);
            return Err(e.into());
        }

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

/// Replaces every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_job_id(job_id: &str) -> String {
    job_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
