use indexmap::{IndexMap, IndexSet};
use log::{info, warn};
use serde::Serialize;
use serde_json::Value;

use super::client::AzureDevOpsClient;
use super::inventory::Inventory;
use super::projects::ProjectTable;
use super::types::{Build, Commit, PipelineDefinition, ProjectRef, ResourceType};

const LANGUAGE_METRICS_API_VERSION: &str = "6.0-preview.1";

/// Per-project entry of the document's `stats` section.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProjectStats {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language_stats: Option<Value>,
    pub resource_counts: ProjectResourceCounts,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProjectResourceCounts {
    pub pipelines: usize,
    pub builds: usize,
    pub endpoint: usize,
    pub variablegroup: usize,
    pub securefile: usize,
    pub queue: usize,
    pub repository: usize,
    pub environment: usize,
    pub commits: usize,
    pub unique_committers: usize,
    pub artifacts: usize,
}

/// Language breakdown of every well-formed project, keyed by project id.
///
/// Projects whose metrics cannot be read still get an entry, without `language_stats`.
pub async fn language_metrics(
    client: &AzureDevOpsClient,
    projects: &ProjectTable,
) -> IndexMap<String, ProjectStats> {
    let mut stats = IndexMap::new();
    for project in projects.well_formed() {
        let metrics = match client.project_url(
            &project.id,
            "projectanalysis/languagemetrics",
            &[("api-version", LANGUAGE_METRICS_API_VERSION)],
        ) {
            Ok(url) => client.fetch(&url).await,
            Err(e) => Err(e),
        };
        let language_stats = match metrics {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                warn!("Failed to retrieve language metrics for project {}: {e}", project.name);
                None
            }
        };
        stats.insert(
            project.id.clone(),
            ProjectStats {
                language_stats,
                resource_counts: ProjectResourceCounts::default(),
            },
        );
    }
    stats
}

fn in_project(reference: Option<&ProjectRef>, project_id: &str) -> bool {
    reference.is_some_and(|reference| reference.id == project_id)
}

/// Fills `resource_counts` of every project entry from the scan's collected records.
pub fn enrich_stats(
    stats: &mut IndexMap<String, ProjectStats>,
    inventory: &Inventory,
    definitions: &[PipelineDefinition],
    builds: &[Build],
    commits: &[Commit],
    artifacts: &[Value],
) {
    info!("Enriching stats with resource counts");

    for (project_id, entry) in stats.iter_mut() {
        let project_id = project_id.as_str();
        let owned = |resource_type: ResourceType| {
            inventory
                .resources(resource_type)
                .filter(|resource| in_project(resource.k_project.as_ref(), project_id))
                .count()
        };
        let project_commits = || {
            commits
                .iter()
                .filter(move |commit| in_project(commit.k_project.as_ref(), project_id))
        };

        entry.resource_counts = ProjectResourceCounts {
            pipelines: definitions
                .iter()
                .filter(|definition| in_project(definition.k_project.as_ref(), project_id))
                .count(),
            builds: builds
                .iter()
                .filter(|build| in_project(build.k_project.as_ref(), project_id))
                .count(),
            endpoint: inventory
                .resources(ResourceType::Endpoint)
                .filter(|endpoint| {
                    endpoint
                        .project_references()
                        .is_some_and(|refs| refs.iter().any(|r| r.project.id == project_id))
                })
                .count(),
            variablegroup: owned(ResourceType::VariableGroup),
            securefile: owned(ResourceType::SecureFile),
            queue: owned(ResourceType::Queue),
            repository: owned(ResourceType::Repository),
            environment: owned(ResourceType::Environment),
            commits: project_commits().count(),
            unique_committers: project_commits()
                .filter_map(|commit| commit.committer_email.as_deref())
                .collect::<IndexSet<_>>()
                .len(),
            artifacts: artifacts
                .iter()
                .filter(|artifact| {
                    artifact.pointer("/k_project/id").and_then(Value::as_str) == Some(project_id)
                })
                .count(),
        };
    }
}
