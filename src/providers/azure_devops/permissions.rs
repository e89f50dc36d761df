use log::{debug, warn};
use serde_json::Value;

use super::checks::api_resource_id;
use super::client::AzureDevOpsClient;
use super::inventory::Inventory;
use super::projects::ProjectTable;
use super::types::{
    id_string, Build, Level, PipelineDefinition, PipelineKey, Resource, ResourceDetails,
    ResourceType,
};
use crate::error::Result;

/// How the pipelines authorized on a resource type are found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// One lookup per project the endpoint is shared with.
    ProjectReferences,
    /// Per-project lookups plus a reverse lookup over builds and definitions.
    RepositoryScoped,
    /// One lookup per well-formed project.
    PerProject,
    /// Edges arrive from elsewhere (pools from their queues) or are not tracked.
    Inherited,
}

const STRATEGIES: [(ResourceType, Strategy); 8] = [
    (ResourceType::Endpoint, Strategy::ProjectReferences),
    (ResourceType::Repository, Strategy::RepositoryScoped),
    (ResourceType::Queue, Strategy::PerProject),
    (ResourceType::VariableGroup, Strategy::PerProject),
    (ResourceType::SecureFile, Strategy::PerProject),
    (ResourceType::Environment, Strategy::PerProject),
    (ResourceType::Pool, Strategy::Inherited),
    (ResourceType::DeploymentGroup, Strategy::Inherited),
];

pub fn strategy_for(resource_type: ResourceType) -> Strategy {
    STRATEGIES
        .iter()
        .find(|(candidate, _)| *candidate == resource_type)
        .map_or(Strategy::Inherited, |(_, strategy)| *strategy)
}

/// Answer of the pipeline-permissions API for one resource in one project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionGrant {
    AllPipelines,
    Pipelines(Vec<String>),
    Unrecognized,
}

impl PermissionGrant {
    /// `allPipelines` may be a bare `true` or an `{authorized: true, ...}` object.
    pub fn from_response(response: &Value) -> Self {
        let all = match response.get("allPipelines") {
            Some(Value::Bool(authorized)) => *authorized,
            Some(Value::Object(grant)) => grant
                .get("authorized")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            _ => false,
        };
        if all {
            return Self::AllPipelines;
        }

        match response.get("pipelines") {
            Some(Value::Array(pipelines)) => Self::Pipelines(
                pipelines
                    .iter()
                    .filter_map(|pipeline| pipeline.get("id").and_then(id_string))
                    .collect(),
            ),
            Some(Value::Null) => Self::Pipelines(Vec::new()),
            _ if response.get("allPipelines").is_some() => Self::Pipelines(Vec::new()),
            _ => Self::Unrecognized,
        }
    }

    /// Pipeline keys of `project_id` this grant covers.
    pub fn keys(&self, project_id: &str, known: &[PipelineKey]) -> Vec<PipelineKey> {
        match self {
            Self::AllPipelines => known
                .iter()
                .filter(|key| key.belongs_to(project_id))
                .cloned()
                .collect(),
            Self::Pipelines(ids) => ids
                .iter()
                .map(|id| PipelineKey::new(project_id, id.clone()))
                .collect(),
            Self::Unrecognized => Vec::new(),
        }
    }
}

/// Definitions that build from the repository or live in its project.
pub fn repository_reverse_lookup(
    repository_id: &str,
    repository_project_id: &str,
    definitions: &[PipelineDefinition],
    builds: &[Build],
) -> Vec<PipelineKey> {
    let from_builds = builds.iter().filter_map(|build| {
        let related = build.repository_id() == Some(repository_id)
            || build.definition_project_id() == Some(repository_project_id);
        if related {
            build.definition_key()
        } else {
            None
        }
    });
    let from_definitions = definitions.iter().filter_map(|definition| {
        let related = definition.repository_id() == Some(repository_id)
            || definition.k_key.belongs_to(repository_project_id);
        related.then(|| definition.k_key.clone())
    });
    from_builds.chain(from_definitions).collect()
}

/// Fills `pipelinepermissions` on every resource using the strategy of its type.
pub struct PermissionResolver<'a> {
    client: &'a AzureDevOpsClient,
    projects: &'a ProjectTable,
    definitions: &'a [PipelineDefinition],
    builds: &'a [Build],
    known_keys: Vec<PipelineKey>,
}

impl<'a> PermissionResolver<'a> {
    pub fn new(
        client: &'a AzureDevOpsClient,
        projects: &'a ProjectTable,
        definitions: &'a [PipelineDefinition],
        builds: &'a [Build],
    ) -> Self {
        Self {
            client,
            projects,
            definitions,
            builds,
            known_keys: definitions.iter().map(|d| d.k_key.clone()).collect(),
        }
    }

    pub async fn resolve(&self, inventory: &mut Inventory) {
        for resource in inventory.iter_mut() {
            self.resolve_resource(resource).await;
        }
    }

    pub async fn resolve_resource(&self, resource: &mut Resource) {
        let resource_type = resource.resource_type();
        match strategy_for(resource_type) {
            Strategy::ProjectReferences => self.resolve_endpoint(resource).await,
            Strategy::RepositoryScoped => self.resolve_repository(resource).await,
            Strategy::PerProject if resource_type.level() == Level::Project => {
                self.resolve_per_project(resource).await;
            }
            Strategy::PerProject | Strategy::Inherited => {}
        }
        debug!(
            "{} pipelines authorized on {resource_type} {}",
            resource.pipelinepermissions.len(),
            resource.name
        );
    }

    async fn query(&self, project_id: &str, resource_type: ResourceType, resource_id: &str) -> Result<PermissionGrant> {
        let url = self.client.project_url(
            project_id,
            &format!(
                "pipelines/pipelinepermissions/{}/{resource_id}",
                resource_type.api_name()
            ),
            &[("api-version", "7.1-preview.1")],
        )?;
        Ok(PermissionGrant::from_response(&self.client.fetch(&url).await?))
    }

    async fn resolve_endpoint(&self, resource: &mut Resource) {
        let Resource {
            id,
            details,
            pipelinepermissions,
            ..
        } = resource;
        let ResourceDetails::Endpoint {
            k_projects_refs, ..
        } = details
        else {
            return;
        };
        let id = id.as_str();

        for reference in k_projects_refs.iter_mut() {
            let project_id = reference.project.id.clone();
            if !self.projects.contains(&project_id) {
                warn!("Endpoint {id} is shared with project {project_id}, which was not discovered");
                reference.warning = Some(format!(
                    "Project ID {project_id} is not among the discovered projects; the token may not be scoped to it"
                ));
                continue;
            }

            match self.query(&project_id, ResourceType::Endpoint, id).await {
                Ok(PermissionGrant::Unrecognized) => {
                    reference.warning = Some(format!(
                        "Pipeline permissions of project {project_id} could not be read; the token may lack the required scope"
                    ));
                }
                Ok(grant) => {
                    let keys = grant.keys(&project_id, &self.known_keys);
                    reference.pipelinepermissions.extend(keys.iter());
                    pipelinepermissions.extend(keys);
                }
                Err(e) => {
                    warn!("Could not read pipeline permissions of endpoint {id} in project {project_id}: {e}");
                    reference.warning = Some(match e.status() {
                        Some(status @ (401 | 403 | 404)) => format!(
                            "Pipeline permissions of project {project_id} are not accessible (HTTP {status})"
                        ),
                        _ => e.to_string(),
                    });
                }
            }
        }
    }

    async fn resolve_repository(&self, resource: &mut Resource) {
        let Some(repository_project_id) = resource.owning_project_id().map(str::to_string) else {
            return;
        };
        let composite_id = api_resource_id(resource);

        for project in self.projects.well_formed() {
            match self
                .query(&project.id, ResourceType::Repository, &composite_id)
                .await
            {
                Ok(grant) => resource
                    .pipelinepermissions
                    .extend(grant.keys(&project.id, &self.known_keys)),
                Err(e) => warn!(
                    "Could not read pipeline permissions of repository {} in project {}: {e}",
                    resource.name, project.name
                ),
            }
        }

        resource.pipelinepermissions.extend(repository_reverse_lookup(
            &resource.id,
            &repository_project_id,
            self.definitions,
            self.builds,
        ));
    }

    async fn resolve_per_project(&self, resource: &mut Resource) {
        let resource_type = resource.resource_type();
        for project in self.projects.well_formed() {
            match self.query(&project.id, resource_type, &resource.id).await {
                Ok(grant) => resource
                    .pipelinepermissions
                    .extend(grant.keys(&project.id, &self.known_keys)),
                Err(e) => warn!(
                    "Could not read pipeline permissions of {resource_type} {} in project {}: {e}",
                    resource.name, project.name
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::azure_devops::test_support::{client_for, projects};
    use crate::providers::azure_devops::types::{EndpointProjectRef, PermissionSet};
    use mockito::Matcher;
    use serde_json::json;

    fn definition(project_id: &str, id: &str, repository_id: &str) -> PipelineDefinition {
        let mut definition: PipelineDefinition = serde_json::from_value(json!({
            "id": 1,
            "name": id,
            "repository": {"id": repository_id, "type": "TfsGit"}
        }))
        .unwrap();
        definition.k_key = PipelineKey::new(project_id, id);
        definition
    }

    fn keys(set: &PermissionSet) -> Vec<String> {
        set.iter().map(ToString::to_string).collect()
    }

    mod grants {
        use super::*;

        #[test]
        fn all_pipelines_as_bool_or_object() {
            assert_eq!(
                PermissionGrant::from_response(&json!({"allPipelines": true})),
                PermissionGrant::AllPipelines
            );
            assert_eq!(
                PermissionGrant::from_response(&json!({"allPipelines": {"authorized": true}})),
                PermissionGrant::AllPipelines
            );
        }

        #[test]
        fn explicit_pipeline_list() {
            let grant = PermissionGrant::from_response(&json!({
                "resource": {"id": "7", "type": "variablegroup"},
                "pipelines": [{"id": 4, "authorized": true}, {"id": 9, "authorized": true}]
            }));
            assert_eq!(grant, PermissionGrant::Pipelines(vec!["4".into(), "9".into()]));

            let keys = grant.keys("P1", &[]);
            assert_eq!(keys[1].to_string(), "P1_9");
        }

        #[test]
        fn unreadable_answer() {
            assert_eq!(
                PermissionGrant::from_response(&json!({"resource": {"id": "7"}})),
                PermissionGrant::Unrecognized
            );
        }

        #[test]
        fn all_pipelines_covers_only_the_queried_project() {
            let known = vec![PipelineKey::new("P1", "1"), PipelineKey::new("P2", "1")];
            let keys = PermissionGrant::AllPipelines.keys("P1", &known);
            assert_eq!(keys, vec![PipelineKey::new("P1", "1")]);
        }
    }

    #[test]
    fn strategy_table_covers_every_type() {
        assert_eq!(strategy_for(ResourceType::Endpoint), Strategy::ProjectReferences);
        assert_eq!(strategy_for(ResourceType::Pool), Strategy::Inherited);
        assert_eq!(strategy_for(ResourceType::DeploymentGroup), Strategy::Inherited);
        for resource_type in ResourceType::ALL {
            assert!(STRATEGIES.iter().any(|(candidate, _)| *candidate == resource_type));
        }
    }

    #[test]
    fn reverse_lookup_matches_repository_or_project() {
        let definitions = vec![
            definition("P1", "D1", "Repo1"),
            definition("P2", "D2", "Repo1"),
            definition("P2", "D3", "Other"),
        ];
        let keys = repository_reverse_lookup("Repo1", "P1", &definitions, &[]);
        assert_eq!(keys, vec![PipelineKey::new("P1", "D1"), PipelineKey::new("P2", "D2")]);
    }

    #[tokio::test]
    async fn repository_with_all_pipelines_in_single_project() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/Contoso/P1/_apis/pipelines/pipelinepermissions/repository/P1.Repo1")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"allPipelines": true}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let table = projects(&[("P1", "One")]);
        let definitions = vec![definition("P1", "D1", "Repo1")];
        let resolver = PermissionResolver::new(&client, &table, &definitions, &[]);

        let mut repository = Resource::new(
            "Repo1",
            "Repo1",
            ResourceDetails::Repository {
                project_id: "P1".into(),
                branches: Vec::new(),
                stats: None,
            },
        );
        repository.k_project = table.project_ref("P1", None);
        resolver.resolve_resource(&mut repository).await;

        assert_eq!(keys(&repository.pipelinepermissions), vec!["P1_D1"]);
        assert!(!crate::providers::azure_devops::classify::is_cross_project(&repository));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn endpoint_shared_with_two_projects() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/Contoso/P1/_apis/pipelines/pipelinepermissions/endpoint/EP1")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"pipelines": [{"id": "D1"}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/Contoso/P2/_apis/pipelines/pipelinepermissions/endpoint/EP1")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"pipelines": [{"id": "D2"}]}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let table = projects(&[("P1", "One"), ("P2", "Two")]);
        let resolver = PermissionResolver::new(&client, &table, &[], &[]);

        let refs = ["P1", "P2", "P9"]
            .iter()
            .map(|id| EndpointProjectRef {
                project: table.project_ref_or(id, None, "Unknown"),
                pipelinepermissions: PermissionSet::new(),
                warning: None,
            })
            .collect();
        let mut endpoint = Resource::new(
            "EP1",
            "EP1",
            ResourceDetails::Endpoint {
                k_projects_refs: refs,
                k_project_shared_from: Vec::new(),
                is_shared: true,
            },
        );
        resolver.resolve_resource(&mut endpoint).await;

        assert_eq!(keys(&endpoint.pipelinepermissions), vec!["P1_D1", "P2_D2"]);
        let refs = endpoint.project_references().unwrap();
        assert_eq!(keys(&refs[0].pipelinepermissions), vec!["P1_D1"]);
        assert_eq!(keys(&refs[1].pipelinepermissions), vec!["P2_D2"]);
        assert!(refs[2].pipelinepermissions.is_empty());
        assert!(refs[2].warning.is_some());
    }

    #[tokio::test]
    async fn forbidden_endpoint_lookup_becomes_warning() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/Contoso/P1/_apis/pipelines/pipelinepermissions/endpoint/EP1")
            .match_query(Matcher::Any)
            .with_status(403)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let table = projects(&[("P1", "One")]);
        let resolver = PermissionResolver::new(&client, &table, &[], &[]);
        let mut endpoint = Resource::new(
            "EP1",
            "EP1",
            ResourceDetails::Endpoint {
                k_projects_refs: vec![EndpointProjectRef {
                    project: table.project_ref_or("P1", None, "One"),
                    pipelinepermissions: PermissionSet::new(),
                    warning: None,
                }],
                k_project_shared_from: Vec::new(),
                is_shared: false,
            },
        );
        resolver.resolve_resource(&mut endpoint).await;

        let refs = endpoint.project_references().unwrap();
        assert!(endpoint.pipelinepermissions.is_empty());
        assert_eq!(
            refs[0].warning.as_deref(),
            Some("Pipeline permissions of project P1 are not accessible (HTTP 403)")
        );
    }

    #[tokio::test]
    async fn failing_project_does_not_stop_resolution() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/Contoso/P1/_apis/pipelines/pipelinepermissions/variablegroup/7")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"message": "forbidden"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/Contoso/P2/_apis/pipelines/pipelinepermissions/variablegroup/7")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"pipelines": [{"id": 3}, {"id": 3}]}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let table = projects(&[("P1", "One"), ("P2", "Two")]);
        let resolver = PermissionResolver::new(&client, &table, &[], &[]);

        let mut group = Resource::new("7", "vars", ResourceDetails::VariableGroup);
        resolver.resolve_resource(&mut group).await;

        assert_eq!(keys(&group.pipelinepermissions), vec!["P2_3"]);
    }
}
