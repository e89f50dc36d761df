use indexmap::IndexMap;
use log::{info, warn};
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

use super::client::{items, AzureDevOpsClient};
use super::types::{GeneralSettings, Project, ProjectRef, ProjectRefKind};
use crate::error::Result;

/// Projects discovered in the organization, keyed by project id.
#[derive(Debug, Clone, Default)]
pub struct ProjectTable {
    projects: IndexMap<String, Project>,
}

impl ProjectTable {
    pub fn new(projects: impl IntoIterator<Item = Project>) -> Self {
        Self {
            projects: projects
                .into_iter()
                .map(|project| (project.id.clone(), project))
                .collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Project> {
        self.projects.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.projects.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Project> {
        self.projects.values()
    }

    /// Projects whose resources are crawled. Deleted or half-created ones are only recorded.
    pub fn well_formed(&self) -> impl Iterator<Item = &Project> {
        self.projects.values().filter(|project| project.is_well_formed())
    }

    /// Reference to a discovered project, `None` when the id is unknown.
    pub fn project_ref(&self, id: &str, self_attribute: Option<String>) -> Option<ProjectRef> {
        self.get(id).map(|project| ProjectRef {
            kind: ProjectRefKind::Project,
            id: project.id.clone(),
            name: project.name.clone(),
            self_attribute,
        })
    }

    /// Reference to a project that may lie outside the discovered set, named by the caller.
    pub fn project_ref_or(
        &self,
        id: &str,
        self_attribute: Option<String>,
        fallback_name: &str,
    ) -> ProjectRef {
        self.project_ref(id, self_attribute.clone())
            .unwrap_or_else(|| ProjectRef {
                kind: ProjectRefKind::Project,
                id: id.to_string(),
                name: fallback_name.to_string(),
                self_attribute,
            })
    }

    fn iter_mut(&mut self) -> impl Iterator<Item = &mut Project> {
        self.projects.values_mut()
    }
}

impl Serialize for ProjectTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.projects.serialize(serializer)
    }
}

/// Lists every project (any state) and keeps those matching `filter`.
///
/// An empty filter keeps everything. Entries match a project id or name, case-insensitively.
pub async fn discover_projects(client: &AzureDevOpsClient, filter: &[String]) -> Result<ProjectTable> {
    let url = client.org_url("projects", &[("stateFilter", "all"), ("api-version", "7.1")])?;
    let listed = client.fetch_all(&url).await?;

    let mut projects = Vec::with_capacity(listed.len());
    for raw in listed {
        match serde_json::from_value::<Project>(raw) {
            Ok(project) => projects.push(project),
            Err(e) => warn!("Skipping malformed project record: {e}"),
        }
    }

    let total = projects.len();
    let projects: Vec<Project> = projects
        .into_iter()
        .filter(|project| matches_filter(project, filter))
        .collect();

    if !filter.is_empty() {
        info!("Project filter kept {} of {total} projects", projects.len());
    }

    Ok(ProjectTable::new(projects))
}

fn matches_filter(project: &Project, filter: &[String]) -> bool {
    filter.is_empty()
        || filter.iter().map(|wanted| wanted.trim()).any(|wanted| {
            wanted.eq_ignore_ascii_case(&project.name) || wanted.eq_ignore_ascii_case(&project.id)
        })
}

/// Attaches build settings and build metrics to every well-formed project.
///
/// Failures are logged per project and leave that project's settings unset.
pub async fn collect_general_settings(
    client: &AzureDevOpsClient,
    table: &mut ProjectTable,
    expectations: &IndexMap<String, bool>,
) {
    for project in table.iter_mut().filter(|project| project.is_well_formed()) {
        let settings = match fetch_build_settings(client, &project.id).await {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Could not read build settings of project {}: {e}", project.name);
                continue;
            }
        };

        let build_metrics = match fetch_build_metrics(client, &project.id).await {
            Ok(metrics) => Some(metrics),
            Err(e) => {
                warn!("Could not read build metrics of project {}: {e}", project.name);
                None
            }
        };

        project.general_settings = Some(GeneralSettings {
            build_settings: annotate_settings(settings, expectations),
            build_metrics,
        });
    }
}

async fn fetch_build_settings(client: &AzureDevOpsClient, project_id: &str) -> Result<Map<String, Value>> {
    let url = client.project_url(
        project_id,
        "build/generalsettings",
        &[("api-version", "7.1-preview.1")],
    )?;
    Ok(match client.fetch(&url).await? {
        Value::Object(settings) => settings,
        _ => Map::new(),
    })
}

async fn fetch_build_metrics(client: &AzureDevOpsClient, project_id: &str) -> Result<Value> {
    let url = client.project_url(
        project_id,
        "build/metrics/hourly",
        &[("api-version", "7.1-preview.1")],
    )?;
    Ok(Value::Array(items(client.fetch(&url).await?)))
}

/// Replaces each expected setting with `{expected, found}`; others are kept as reported.
///
/// An expected setting the platform did not report is recorded with `found: null`.
pub fn annotate_settings(
    mut settings: Map<String, Value>,
    expectations: &IndexMap<String, bool>,
) -> Map<String, Value> {
    for (name, expected) in expectations {
        let found = settings.remove(name).unwrap_or(Value::Null);
        settings.insert(name.clone(), json!({ "expected": expected, "found": found }));
    }
    settings
}
