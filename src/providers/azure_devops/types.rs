use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Separator between the project id and the definition id of a [`PipelineKey`].
pub const PIPELINE_KEY_SEPARATOR: char = '_';

/// Organization-wide identity of a pipeline definition: `<project id>_<definition id>`.
///
/// Encoding joins with [`PIPELINE_KEY_SEPARATOR`]; decoding splits on its first
/// occurrence. Project ids are GUIDs and never contain the separator, so the
/// round trip holds for any definition id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PipelineKey {
    project_id: String,
    definition_id: String,
}

impl PipelineKey {
    pub fn new(project_id: impl Into<String>, definition_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            definition_id: definition_id.into(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn definition_id(&self) -> &str {
        &self.definition_id
    }

    pub fn belongs_to(&self, project_id: &str) -> bool {
        self.project_id == project_id
    }
}

impl fmt::Display for PipelineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{PIPELINE_KEY_SEPARATOR}{}",
            self.project_id, self.definition_id
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePipelineKeyError(String);

impl fmt::Display for ParsePipelineKeyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid pipeline key: {:?}", self.0)
    }
}

impl std::error::Error for ParsePipelineKeyError {}

impl FromStr for PipelineKey {
    type Err = ParsePipelineKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(PIPELINE_KEY_SEPARATOR) {
            Some((project, definition)) if !project.is_empty() && !definition.is_empty() => {
                Ok(Self::new(project, definition))
            }
            _ => Err(ParsePipelineKeyError(s.to_string())),
        }
    }
}

impl Serialize for PipelineKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PipelineKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Insertion-ordered, duplicate-free set of pipelines authorized on a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct PermissionSet(IndexSet<PipelineKey>);

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the key was already present.
    pub fn insert(&mut self, key: PipelineKey) -> bool {
        self.0.insert(key)
    }

    pub fn contains(&self, key: &PipelineKey) -> bool {
        self.0.contains(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PipelineKey> {
        self.0.iter()
    }

    /// Distinct owning projects of the authorized pipelines.
    pub fn project_ids(&self) -> IndexSet<&str> {
        self.0.iter().map(PipelineKey::project_id).collect()
    }
}

impl Extend<PipelineKey> for PermissionSet {
    fn extend<I: IntoIterator<Item = PipelineKey>>(&mut self, iter: I) {
        self.0.extend(iter);
    }
}

impl<'a> Extend<&'a PipelineKey> for PermissionSet {
    fn extend<I: IntoIterator<Item = &'a PipelineKey>>(&mut self, iter: I) {
        self.0.extend(iter.into_iter().cloned());
    }
}

impl FromIterator<PipelineKey> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = PipelineKey>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProjectState {
    WellFormed,
    Deleted,
    Deleting,
    New,
    CreatePending,
    #[default]
    #[serde(other)]
    Unknown,
}

/// Build settings and metrics collected for a well-formed project.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralSettings {
    pub build_settings: Map<String, Value>,
    pub build_metrics: Option<Value>,
}

/// An Azure DevOps project as returned by `_apis/projects`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub state: ProjectState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub general_settings: Option<GeneralSettings>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Project {
    pub fn is_well_formed(&self) -> bool {
        self.state == ProjectState::WellFormed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectRefKind {
    Project,
    Org,
}

/// Denormalized pointer to the project (or organization) owning a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    #[serde(rename = "type")]
    pub kind: ProjectRefKind,
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_attribute: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Org,
    Project,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    Endpoint,
    Pool,
    Queue,
    VariableGroup,
    SecureFile,
    Repository,
    Environment,
    DeploymentGroup,
}

impl ResourceType {
    pub const ALL: [ResourceType; 8] = [
        Self::Endpoint,
        Self::Pool,
        Self::Queue,
        Self::VariableGroup,
        Self::SecureFile,
        Self::Repository,
        Self::Environment,
        Self::DeploymentGroup,
    ];

    /// Inventory key and reverse-index label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Endpoint => "endpoint",
            Self::Pool => "pools",
            Self::Queue => "queue",
            Self::VariableGroup => "variablegroup",
            Self::SecureFile => "securefile",
            Self::Repository => "repository",
            Self::Environment => "environment",
            Self::DeploymentGroup => "deploymentgroup",
        }
    }

    /// Resource type name used by the checks and pipeline-permission APIs.
    pub fn api_name(self) -> &'static str {
        match self {
            Self::Pool => "pool",
            other => other.as_str(),
        }
    }

    pub fn level(self) -> Level {
        match self {
            Self::Pool => Level::Org,
            _ => Level::Project,
        }
    }

    /// Whether approvals and checks can be configured on this type.
    pub fn supports_checks(self) -> bool {
        !matches!(self, Self::Pool | Self::DeploymentGroup)
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ResourceType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtectedState {
    Protected,
    #[default]
    Unprotected,
}

/// One project sharing a service endpoint, with the pipelines it authorizes.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointProjectRef {
    #[serde(flatten)]
    pub project: ProjectRef,
    pub pipelinepermissions: PermissionSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Variant-specific part of a [`Resource`], tagged by `resourceType`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "resourceType")]
pub enum ResourceDetails {
    #[serde(rename = "endpoint")]
    Endpoint {
        k_projects_refs: Vec<EndpointProjectRef>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        k_project_shared_from: Vec<ProjectRef>,
        #[serde(skip)]
        is_shared: bool,
    },
    #[serde(rename = "pools")]
    Pool { queues: Vec<Resource> },
    #[serde(rename = "queue")]
    Queue {
        #[serde(skip)]
        pool_id: Option<String>,
    },
    #[serde(rename = "variablegroup")]
    VariableGroup,
    #[serde(rename = "securefile")]
    SecureFile,
    #[serde(rename = "repository")]
    Repository {
        #[serde(skip)]
        project_id: String,
        branches: Vec<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        stats: Option<RepositoryStats>,
    },
    #[serde(rename = "environment")]
    Environment,
    #[serde(rename = "deploymentgroup")]
    DeploymentGroup,
}

impl ResourceDetails {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            Self::Endpoint { .. } => ResourceType::Endpoint,
            Self::Pool { .. } => ResourceType::Pool,
            Self::Queue { .. } => ResourceType::Queue,
            Self::VariableGroup => ResourceType::VariableGroup,
            Self::SecureFile => ResourceType::SecureFile,
            Self::Repository { .. } => ResourceType::Repository,
            Self::Environment => ResourceType::Environment,
            Self::DeploymentGroup => ResourceType::DeploymentGroup,
        }
    }
}

/// A governable CI/CD resource with its authorization edges.
///
/// Platform fields not modelled here are kept verbatim in `extra`.
#[derive(Debug, Clone, Serialize)]
pub struct Resource {
    pub id: String,
    pub name: String,
    #[serde(flatten)]
    pub details: ResourceDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub k_project: Option<ProjectRef>,
    pub k_url: String,
    pub checks: Vec<Value>,
    #[serde(rename = "protectedState")]
    pub protected_state: ProtectedState,
    #[serde(rename = "isCrossProject")]
    pub is_cross_project: bool,
    pub pipelinepermissions: PermissionSet,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Resource {
    pub fn new(id: impl Into<String>, name: impl Into<String>, details: ResourceDetails) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            details,
            k_project: None,
            k_url: String::new(),
            checks: Vec::new(),
            protected_state: ProtectedState::Unprotected,
            is_cross_project: false,
            pipelinepermissions: PermissionSet::new(),
            extra: Map::new(),
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        self.details.resource_type()
    }

    pub fn queues(&self) -> Option<&[Resource]> {
        match &self.details {
            ResourceDetails::Pool { queues } => Some(queues),
            _ => None,
        }
    }

    pub fn project_references(&self) -> Option<&[EndpointProjectRef]> {
        match &self.details {
            ResourceDetails::Endpoint { k_projects_refs, .. } => Some(k_projects_refs),
            _ => None,
        }
    }

    /// Project the resource is listed under, `None` for org-level resources.
    pub fn owning_project_id(&self) -> Option<&str> {
        match (&self.details, &self.k_project) {
            (ResourceDetails::Repository { project_id, .. }, _) => Some(project_id),
            (_, Some(project)) if project.kind == ProjectRefKind::Project => Some(&project.id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityState {
    Active,
    Stale,
    Dormant,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullRequestCounts {
    pub active: usize,
    pub abandoned: usize,
    pub completed: usize,
    pub other: usize,
    pub all: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryCommitters {
    pub total_commits: usize,
    pub count: usize,
    pub unique_committers: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryStats {
    pub first_commit_date: Option<DateTime<Utc>>,
    pub last_commit_date: Option<DateTime<Utc>>,
    /// Days since the last commit
    pub age: Option<i64>,
    pub branches: usize,
    pub pull_requests: PullRequestCounts,
    pub state: ActivityState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committers: Option<RepositoryCommitters>,
}

/// `{id, ...}` reference embedded in platform payloads.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdRef {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionRepository {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_branch: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl DefinitionRepository {
    /// Azure Repos git repository (as opposed to GitHub, Bitbucket, TFVC).
    pub fn is_azure_repos(&self) -> bool {
        self.kind.as_deref() == Some("TfsGit")
    }
}

/// Preview of the YAML a pipeline would run on one branch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PreviewResult {
    pub yaml: Option<String>,
    pub pipeline_recipe: Option<serde_yaml::Value>,
    pub is_yaml_preview_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DefinitionRuns {
    pub preview: IndexMap<String, PreviewResult>,
    pub builds: Vec<String>,
    pub metrics: Option<Value>,
}

pub const DESIGNER_PROCESS: i64 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDefinition {
    pub id: u64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<DefinitionRepository>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<Value>,
    #[serde(skip_deserializing, rename = "k_key")]
    pub k_key: PipelineKey,
    #[serde(skip_deserializing, rename = "k_project")]
    pub k_project: Option<ProjectRef>,
    /// Resources the definition is authorized for, as reported by the definition itself
    #[serde(skip_deserializing)]
    pub resources: Vec<Value>,
    #[serde(skip_deserializing)]
    pub resourcepermissions: IndexMap<String, IndexSet<String>>,
    #[serde(skip_deserializing)]
    pub builds: DefinitionRuns,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PipelineDefinition {
    pub fn process_type(&self) -> Option<i64> {
        self.process.as_ref()?.get("type")?.as_i64()
    }

    pub fn is_designer(&self) -> bool {
        self.process_type() == Some(DESIGNER_PROCESS)
    }

    pub fn is_disabled(&self) -> bool {
        self.queue_status
            .as_deref()
            .is_some_and(|status| status.eq_ignore_ascii_case("disabled"))
    }

    pub fn repository_id(&self) -> Option<&str> {
        self.repository.as_ref().map(|repo| repo.id.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<BuildDefinitionRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<IdRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_parameters: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
    #[serde(skip_deserializing, rename = "k_key")]
    pub k_key: String,
    #[serde(skip_deserializing, rename = "k_project")]
    pub k_project: Option<ProjectRef>,
    #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
    pub yaml: Option<String>,
    #[serde(skip_deserializing, rename = "pipeline_recipe")]
    pub pipeline_recipe: Option<serde_yaml::Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildDefinitionRef {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<IdRef>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Build {
    /// Project the build ran in, taken from its `k_project`.
    pub fn project_id(&self) -> Option<&str> {
        self.k_project.as_ref().map(|project| project.id.as_str())
    }

    /// Key of the definition this build is a run of.
    pub fn definition_key(&self) -> Option<PipelineKey> {
        Some(PipelineKey::new(self.project_id()?, self.definition.as_ref()?.id.clone()))
    }

    pub fn repository_id(&self) -> Option<&str> {
        self.repository.as_ref().map(|repo| repo.id.as_str())
    }

    pub fn definition_project_id(&self) -> Option<&str> {
        self.definition
            .as_ref()?
            .project
            .as_ref()
            .map(|project| project.id.as_str())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeCounts {
    pub add: u64,
    pub edit: u64,
    pub delete: u64,
}

impl std::ops::AddAssign for ChangeCounts {
    fn add_assign(&mut self, other: Self) {
        self.add += other.add;
        self.edit += other.edit;
        self.delete += other.delete;
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub repository_id: String,
    pub repository_name: String,
    pub project_id: String,
    #[serde(rename = "k_project")]
    pub k_project: Option<ProjectRef>,
    pub commit_id: Option<String>,
    pub author_email: Option<String>,
    pub author_name: Option<String>,
    pub committer_email: Option<String>,
    pub committer_name: Option<String>,
    pub committer_date: Option<String>,
    pub change_counts: ChangeCounts,
    pub push_email: Option<String>,
    pub push_id: Option<u64>,
    pub push_date: Option<String>,
    #[serde(serialize_with = "as_flag")]
    pub committer_author_match: bool,
    #[serde(serialize_with = "as_flag")]
    pub committer_pusher_match: bool,
    #[serde(serialize_with = "as_flag")]
    pub commit_by_ado: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitterProjectStats {
    pub project_id: String,
    pub project_name: Option<String>,
    pub repo_count: usize,
    pub commit_count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitterStats {
    pub commit_count: usize,
    pub repo_count: usize,
    pub project_count: usize,
    pub total_change_counts: ChangeCounts,
    pub author_emails: Vec<String>,
    pub pusher_emails: Vec<String>,
    #[serde(serialize_with = "as_flag")]
    pub uses_build_service_account: bool,
    #[serde(serialize_with = "as_flag")]
    pub has_multiple_authors: bool,
    #[serde(serialize_with = "as_flag")]
    pub has_multiple_pushers: bool,
    pub prs_merged: usize,
    pub project_stats: Vec<CommitterProjectStats>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildServiceAccount {
    pub id: String,
    pub name: String,
    pub project_name: Option<String>,
    pub description: String,
}

/// Ids arrive as JSON strings (GUIDs) or numbers (pools, queues, groups).
pub fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    id_string(&value).ok_or_else(|| serde::de::Error::custom(format!("invalid id: {value}")))
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn as_flag<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
}
