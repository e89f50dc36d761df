use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use log::{debug, info, warn};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use super::client::{items, AzureDevOpsClient};
use super::git::{activity_state, boundary_commit_date, list_branches, pull_request_counts};
use super::links::WebLinks;
use super::merge::merge_pools_and_queues;
use super::projects::ProjectTable;
use super::types::{
    id_string, EndpointProjectRef, Level, PermissionSet, Project, ProjectRef, ProjectRefKind,
    Resource, ResourceDetails, ResourceType, RepositoryStats,
};
use crate::error::Result;

/// Keys the scanner writes on every resource; platform values under these names are dropped.
const RESERVED_FIELDS: [&str; 8] = [
    "resourceType",
    "k_project",
    "k_url",
    "checks",
    "protectedState",
    "isCrossProject",
    "pipelinepermissions",
    "k_projects_refs",
];

/// Where and how to list one resource type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub resource_type: ResourceType,
    pub api_endpoint: &'static str,
    pub api_version: &'static str,
    /// Listing records are summaries; the per-id record is fetched for each new resource.
    pub requires_detail_fetch: bool,
}

impl ResourceDescriptor {
    pub fn level(&self) -> Level {
        self.resource_type.level()
    }
}

pub fn default_descriptors() -> Vec<ResourceDescriptor> {
    let descriptor = |resource_type, api_endpoint, requires_detail_fetch| ResourceDescriptor {
        resource_type,
        api_endpoint,
        api_version: "7.1",
        requires_detail_fetch,
    };
    vec![
        descriptor(ResourceType::Endpoint, "serviceendpoint/endpoints", false),
        descriptor(ResourceType::Pool, "distributedtask/pools", false),
        descriptor(ResourceType::Queue, "distributedtask/queues", false),
        descriptor(ResourceType::VariableGroup, "distributedtask/variablegroups", false),
        descriptor(ResourceType::SecureFile, "distributedtask/securefiles", false),
        descriptor(ResourceType::Repository, "git/repositories", false),
        descriptor(ResourceType::Environment, "distributedtask/environments", true),
        descriptor(ResourceType::DeploymentGroup, "distributedtask/deploymentgroups", true),
    ]
}

/// Resources of one type, keyed by id in discovery order.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceCollection {
    pub api_endpoint: String,
    pub level: Level,
    #[serde(serialize_with = "as_list")]
    pub protected_resources: IndexMap<String, Resource>,
}

fn as_list<S: Serializer>(
    resources: &IndexMap<String, Resource>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_seq(resources.values())
}

/// Every crawled resource, grouped by type.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Inventory(IndexMap<ResourceType, ResourceCollection>);

impl Inventory {
    pub fn new(descriptors: &[ResourceDescriptor]) -> Self {
        Self(
            descriptors
                .iter()
                .map(|descriptor| {
                    (
                        descriptor.resource_type,
                        ResourceCollection {
                            api_endpoint: descriptor.api_endpoint.to_string(),
                            level: descriptor.level(),
                            protected_resources: IndexMap::new(),
                        },
                    )
                })
                .collect(),
        )
    }

    /// Adds a resource unless one with the same id is already present for its type.
    pub fn insert(&mut self, resource: Resource) -> bool {
        let resource_type = resource.resource_type();
        let collection = self
            .0
            .entry(resource_type)
            .or_insert_with(|| ResourceCollection {
                api_endpoint: String::new(),
                level: resource_type.level(),
                protected_resources: IndexMap::new(),
            });
        if collection.protected_resources.contains_key(&resource.id) {
            return false;
        }
        collection
            .protected_resources
            .insert(resource.id.clone(), resource);
        true
    }

    pub fn contains(&self, resource_type: ResourceType, id: &str) -> bool {
        self.0
            .get(&resource_type)
            .is_some_and(|collection| collection.protected_resources.contains_key(id))
    }

    pub fn get(&self, resource_type: ResourceType, id: &str) -> Option<&Resource> {
        self.0.get(&resource_type)?.protected_resources.get(id)
    }

    pub fn resources(&self, resource_type: ResourceType) -> impl Iterator<Item = &Resource> {
        self.0
            .get(&resource_type)
            .into_iter()
            .flat_map(|collection| collection.protected_resources.values())
    }

    pub fn resources_mut(
        &mut self,
        resource_type: ResourceType,
    ) -> impl Iterator<Item = &mut Resource> {
        self.0
            .get_mut(&resource_type)
            .into_iter()
            .flat_map(|collection| collection.protected_resources.values_mut())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Resource> {
        self.0
            .values()
            .flat_map(|collection| collection.protected_resources.values())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Resource> {
        self.0
            .values_mut()
            .flat_map(|collection| collection.protected_resources.values_mut())
    }

    pub fn count(&self, resource_type: ResourceType) -> usize {
        self.0
            .get(&resource_type)
            .map_or(0, |collection| collection.protected_resources.len())
    }

    /// Folds queues into their pools. Queue permissions must be resolved first.
    pub fn merge_pools(&mut self) {
        let queues: Vec<Resource> = self.resources(ResourceType::Queue).cloned().collect();
        merge_pools_and_queues(self.resources_mut(ResourceType::Pool), &queues);
    }
}

/// Lists resources per project and resource type into an [`Inventory`].
pub struct InventoryCrawler<'a> {
    client: &'a AzureDevOpsClient,
    projects: &'a ProjectTable,
    links: &'a WebLinks,
}

impl<'a> InventoryCrawler<'a> {
    pub fn new(client: &'a AzureDevOpsClient, projects: &'a ProjectTable, links: &'a WebLinks) -> Self {
        Self {
            client,
            projects,
            links,
        }
    }

    /// Crawls org-level types once and project-level types for every well-formed project.
    ///
    /// Resources already in `inventory` are left untouched, so crawling twice adds nothing.
    pub async fn crawl(&self, inventory: &mut Inventory, descriptors: &[ResourceDescriptor]) {
        for descriptor in descriptors.iter().filter(|d| d.level() == Level::Org) {
            let added = self.crawl_listing(inventory, descriptor, None).await;
            info!("Discovered {added} {} in the organization", descriptor.resource_type);
        }

        for project in self.projects.well_formed() {
            for descriptor in descriptors.iter().filter(|d| d.level() == Level::Project) {
                let added = self.crawl_listing(inventory, descriptor, Some(project)).await;
                debug!(
                    "Discovered {added} new {} in {}",
                    descriptor.resource_type, project.name
                );
            }
        }
    }

    async fn crawl_listing(
        &self,
        inventory: &mut Inventory,
        descriptor: &ResourceDescriptor,
        project: Option<&Project>,
    ) -> usize {
        let resource_type = descriptor.resource_type;
        let scope = project.map_or("the organization", |p| p.name.as_str());

        let listed = match self.list(descriptor, project).await {
            Ok(listed) => listed,
            Err(e) => {
                warn!("Could not list {resource_type} in {scope}: {e}");
                return 0;
            }
        };

        let mut added = 0;
        for raw in listed {
            let Some(id) = raw.get("id").and_then(id_string) else {
                warn!("Skipping {resource_type} without an id in {scope}");
                continue;
            };
            if inventory.contains(resource_type, &id) {
                continue;
            }

            let raw = if descriptor.requires_detail_fetch {
                self.fetch_detail(descriptor, project, &id).await.unwrap_or(raw)
            } else {
                raw
            };
            let Value::Object(fields) = raw else {
                continue;
            };

            let mut resource = self.build_resource(resource_type, fields, project);
            if let ResourceDetails::Endpoint {
                is_shared: true, ..
            } = resource.details
            {
                let origin = self.shared_from(&resource).await;
                if let ResourceDetails::Endpoint {
                    k_project_shared_from,
                    ..
                } = &mut resource.details
                {
                    *k_project_shared_from = origin;
                }
            }

            if inventory.insert(resource) {
                added += 1;
            }
        }
        added
    }

    async fn list(&self, descriptor: &ResourceDescriptor, project: Option<&Project>) -> Result<Vec<Value>> {
        let query = [("api-version", descriptor.api_version)];
        let url = match project {
            Some(project) => self
                .client
                .project_url(&project.id, descriptor.api_endpoint, &query)?,
            None => self.client.org_url(descriptor.api_endpoint, &query)?,
        };
        self.client.fetch_all(&url).await
    }

    async fn fetch_detail(
        &self,
        descriptor: &ResourceDescriptor,
        project: Option<&Project>,
        id: &str,
    ) -> Option<Value> {
        let path = format!("{}/{id}", descriptor.api_endpoint);
        let query = [("api-version", descriptor.api_version)];
        let url = match project {
            Some(project) => self.client.project_url(&project.id, &path, &query),
            None => self.client.org_url(&path, &query),
        };

        let detail = match url {
            Ok(url) => self.client.fetch(&url).await,
            Err(e) => Err(e),
        };
        match detail {
            Ok(detail @ Value::Object(_)) => Some(detail),
            Ok(_) => None,
            Err(e) => {
                warn!("Could not read {} {id}: {e}", descriptor.resource_type);
                None
            }
        }
    }

    /// Normalizes a listing record, attaching `k_url`, `k_project` and endpoint references.
    pub fn build_resource(
        &self,
        resource_type: ResourceType,
        mut fields: Map<String, Value>,
        project: Option<&Project>,
    ) -> Resource {
        let id = fields.remove("id").as_ref().and_then(id_string).unwrap_or_default();
        let name = match fields.remove("name") {
            Some(Value::String(name)) => name,
            _ => String::new(),
        };
        for key in RESERVED_FIELDS {
            fields.remove(key);
        }

        let project_id = project.map(|p| p.id.as_str());
        let project_name = project.map_or("", |p| p.name.as_str());

        let details = match resource_type {
            ResourceType::Endpoint => ResourceDetails::Endpoint {
                k_projects_refs: self.endpoint_references(&fields, &id),
                k_project_shared_from: Vec::new(),
                is_shared: fields.get("isShared").and_then(Value::as_bool).unwrap_or(false),
            },
            ResourceType::Pool => ResourceDetails::Pool { queues: Vec::new() },
            ResourceType::Queue => ResourceDetails::Queue {
                pool_id: fields
                    .get("pool")
                    .and_then(|pool| pool.get("id"))
                    .and_then(id_string),
            },
            ResourceType::VariableGroup => ResourceDetails::VariableGroup,
            ResourceType::SecureFile => ResourceDetails::SecureFile,
            ResourceType::Repository => ResourceDetails::Repository {
                project_id: fields
                    .get("project")
                    .and_then(|p| p.get("id"))
                    .and_then(id_string)
                    .or_else(|| project_id.map(str::to_string))
                    .unwrap_or_default(),
                branches: Vec::new(),
                stats: None,
            },
            ResourceType::Environment => ResourceDetails::Environment,
            ResourceType::DeploymentGroup => ResourceDetails::DeploymentGroup,
        };

        let k_project = match resource_type {
            ResourceType::Pool => Some(ProjectRef {
                kind: ProjectRefKind::Org,
                id: fields.get("scope").and_then(id_string).unwrap_or_default(),
                name: self.client.organization().to_string(),
                self_attribute: Some(self.links.pool_agents(&id)),
            }),
            ResourceType::Queue => fields
                .get("projectId")
                .and_then(id_string)
                .and_then(|pid| {
                    let link = self.links.queue_agents(&pid, &id);
                    self.projects.project_ref(&pid, Some(link))
                }),
            ResourceType::Repository => project_id.and_then(|pid| {
                let web_url = fields.get("webUrl").and_then(Value::as_str).map(str::to_string);
                self.projects.project_ref(pid, web_url)
            }),
            other => project_id.and_then(|pid| {
                let link = self.links.resource(other, pid, &id, &name);
                self.projects.project_ref(pid, Some(link))
            }),
        };

        let mut resource = Resource::new(id, name, details);
        resource.k_url = self
            .links
            .resource(resource_type, project_name, &resource.id, &resource.name);
        resource.k_project = k_project;
        resource.extra = fields;
        resource
    }

    fn endpoint_references(&self, fields: &Map<String, Value>, endpoint_id: &str) -> Vec<EndpointProjectRef> {
        fields
            .get("serviceEndpointProjectReferences")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|reference| {
                let project = reference.get("projectReference")?;
                let project_id = project.get("id").and_then(id_string)?;
                let project_name = project.get("name").and_then(Value::as_str).unwrap_or_default();
                let link = self
                    .links
                    .resource(ResourceType::Endpoint, &project_id, endpoint_id, "");
                Some(EndpointProjectRef {
                    project: self.projects.project_ref_or(&project_id, Some(link), project_name),
                    pipelinepermissions: PermissionSet::new(),
                    warning: None,
                })
            })
            .collect()
    }

    /// Projects a shared endpoint originates from, read from its collection role assignments.
    async fn shared_from(&self, endpoint: &Resource) -> Vec<ProjectRef> {
        let path = format!(
            "securityroles/scopes/distributedtask.collection.serviceendpointrole/roleassignments/resources/collection_{}",
            endpoint.id
        );
        let assignments = match self.client.org_url(&path, &[("api-version", "7.1-preview.1")]) {
            Ok(url) => self.client.fetch(&url).await,
            Err(e) => Err(e),
        };
        match assignments {
            Ok(assignments) => {
                shared_origin(endpoint.project_references().unwrap_or_default(), &items(assignments))
            }
            Err(e) => {
                warn!("Could not read sharing origin of endpoint {}: {e}", endpoint.name);
                Vec::new()
            }
        }
    }

    /// Adds branches, commit dates, pull-request counts and activity state to repositories.
    ///
    /// Each lookup is independent; a failed one leaves its part of the stats empty.
    pub async fn enrich_repositories(&self, inventory: &mut Inventory, page_size: usize, now: DateTime<Utc>) {
        for repository in inventory.resources_mut(ResourceType::Repository) {
            let Resource {
                id, name, details, ..
            } = repository;
            let ResourceDetails::Repository {
                project_id,
                branches,
                stats,
            } = details
            else {
                continue;
            };
            let (id, name, project_id) = (id.as_str(), name.as_str(), project_id.as_str());

            *branches = list_branches(self.client, id).await.unwrap_or_else(|e| {
                warn!("Could not list branches of {name}: {e}");
                Vec::new()
            });

            let first_commit_date = boundary_commit_date(self.client, project_id, id, true)
                .await
                .unwrap_or_else(|e| {
                    warn!("Could not read first commit of {name}: {e}");
                    None
                });
            let last_commit_date = boundary_commit_date(self.client, project_id, id, false)
                .await
                .unwrap_or_else(|e| {
                    warn!("Could not read last commit of {name}: {e}");
                    None
                });
            let pull_requests = pull_request_counts(self.client, project_id, id, page_size)
                .await
                .unwrap_or_else(|e| {
                    warn!("Could not count pull requests of {name}: {e}");
                    Default::default()
                });

            *stats = Some(RepositoryStats {
                first_commit_date,
                last_commit_date,
                age: last_commit_date.map(|date| (now - date).num_days()),
                branches: branches.len(),
                pull_requests,
                state: activity_state(last_commit_date, now),
                committers: None,
            });
        }
    }
}

/// Reference projects whose name appears in a role assignment's identity display name.
pub fn shared_origin(references: &[EndpointProjectRef], assignments: &[Value]) -> Vec<ProjectRef> {
    let mut origin: Vec<ProjectRef> = Vec::new();
    for reference in references {
        let project_name = reference.project.name.as_str();
        if project_name.is_empty() {
            continue;
        }
        for assignment in assignments {
            let identity = assignment
                .pointer("/identity/displayName")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let known = origin.iter().any(|o| o.id == reference.project.id);
            if identity.contains(project_name) && !known {
                origin.push(ProjectRef {
                    kind: ProjectRefKind::Project,
                    id: reference.project.id.clone(),
                    name: project_name.to_string(),
                    self_attribute: None,
                });
            }
        }
    }
    origin
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::azure_devops::test_support::{client_for, projects};
    use chrono::TimeZone;
    use mockito::Matcher;
    use serde_json::json;

    fn links(base: &str) -> WebLinks {
        WebLinks::new(base, "Contoso").unwrap()
    }

    async fn mock_listing(server: &mut mockito::ServerGuard, path: &str, body: Value) -> mockito::Mock {
        server
            .mock("GET", path)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(json!({"count": 0, "value": body}).to_string())
            .create_async()
            .await
    }

    mod normalization {
        use super::*;

        #[test]
        fn endpoint_gets_one_reference_per_project() {
            let client = client_for("https://dev.azure.com/");
            let table = projects(&[("p1", "Web"), ("p2", "Mobile")]);
            let links = links("https://dev.azure.com/");
            let crawler = InventoryCrawler::new(&client, &table, &links);

            let raw = json!({
                "id": "ep-1",
                "name": "EP1",
                "type": "azurerm",
                "isShared": true,
                "serviceEndpointProjectReferences": [
                    {"projectReference": {"id": "p1", "name": "Web"}, "name": "EP1"},
                    {"projectReference": {"id": "p9", "name": "Elsewhere"}, "name": "EP1"}
                ]
            });
            let resource = crawler.build_resource(
                ResourceType::Endpoint,
                raw.as_object().unwrap().clone(),
                table.get("p1"),
            );

            assert_eq!(resource.k_url, "https://dev.azure.com/Contoso/Web/_settings/adminservices?resourceId=ep-1");
            assert_eq!(resource.k_project.as_ref().unwrap().name, "Web");
            let refs = resource.project_references().unwrap();
            assert_eq!(refs.len(), 2);
            assert_eq!(refs[1].project.name, "Elsewhere");
            assert_eq!(resource.extra["type"], json!("azurerm"));
        }

        #[test]
        fn pool_is_owned_by_the_organization() {
            let client = client_for("https://dev.azure.com/");
            let table = projects(&[("p1", "Web")]);
            let links = links("https://dev.azure.com/");
            let crawler = InventoryCrawler::new(&client, &table, &links);

            let raw = json!({"id": 9, "name": "Default", "scope": "scope-guid"});
            let pool = crawler.build_resource(ResourceType::Pool, raw.as_object().unwrap().clone(), None);

            let owner = pool.k_project.unwrap();
            assert_eq!(owner.kind, ProjectRefKind::Org);
            assert_eq!(owner.id, "scope-guid");
            assert_eq!(owner.name, "Contoso");
            assert_eq!(pool.id, "9");
        }

        #[test]
        fn queue_owner_comes_from_its_project_id() {
            let client = client_for("https://dev.azure.com/");
            let table = projects(&[("p1", "Web")]);
            let links = links("https://dev.azure.com/");
            let crawler = InventoryCrawler::new(&client, &table, &links);

            let raw = json!({"id": 11, "name": "Default", "projectId": "p1", "pool": {"id": 9}});
            let queue = crawler.build_resource(ResourceType::Queue, raw.as_object().unwrap().clone(), table.get("p1"));

            assert_eq!(queue.k_project.as_ref().unwrap().id, "p1");
            assert!(matches!(
                queue.details,
                ResourceDetails::Queue { pool_id: Some(ref pool) } if pool == "9"
            ));
        }

        #[test]
        fn reserved_platform_fields_are_dropped() {
            let client = client_for("https://dev.azure.com/");
            let table = projects(&[("p1", "Web")]);
            let links = links("https://dev.azure.com/");
            let crawler = InventoryCrawler::new(&client, &table, &links);

            let raw = json!({"id": 3, "name": "vars", "checks": ["not ours"]});
            let group = crawler.build_resource(
                ResourceType::VariableGroup,
                raw.as_object().unwrap().clone(),
                table.get("p1"),
            );
            assert!(!group.extra.contains_key("checks"));
            assert!(group.checks.is_empty());
        }
    }

    #[test]
    fn shared_origin_matches_identity_names() {
        let table = projects(&[("p1", "Web"), ("p2", "Mobile")]);
        let refs: Vec<EndpointProjectRef> = ["p1", "p2"]
            .iter()
            .map(|id| EndpointProjectRef {
                project: table.project_ref(id, None).unwrap(),
                pipelinepermissions: PermissionSet::new(),
                warning: None,
            })
            .collect();
        let assignments = vec![json!({"identity": {"displayName": "[Mobile]\\Endpoint Administrators"}})];

        let origin = shared_origin(&refs, &assignments);
        assert_eq!(origin.len(), 1);
        assert_eq!(origin[0].id, "p2");
    }

    #[test]
    fn shared_origin_lists_each_project_once() {
        let table = projects(&[("p1", "Web")]);
        let refs = vec![EndpointProjectRef {
            project: table.project_ref("p1", None).unwrap(),
            pipelinepermissions: PermissionSet::new(),
            warning: None,
        }];
        let assignments = vec![
            json!({"identity": {"displayName": "[Web]\\Endpoint Administrators"}}),
            json!({"identity": {"displayName": "[Web]\\Endpoint Creators"}}),
        ];

        let origin = shared_origin(&refs, &assignments);
        assert_eq!(origin.len(), 1);
        assert_eq!(origin[0].id, "p1");
    }

    #[tokio::test]
    async fn crawl_skips_known_ids_and_is_idempotent() {
        let mut server = mockito::Server::new_async().await;
        mock_listing(
            &mut server,
            "/Contoso/p1/_apis/distributedtask/variablegroups",
            json!([{"id": 1, "name": "shared"}, {"id": 2, "name": "web-only"}]),
        )
        .await;
        mock_listing(
            &mut server,
            "/Contoso/p2/_apis/distributedtask/variablegroups",
            json!([{"id": 1, "name": "shared"}]),
        )
        .await;

        let client = client_for(&server.url());
        let table = projects(&[("p1", "Web"), ("p2", "Mobile")]);
        let links = links(&server.url());
        let crawler = InventoryCrawler::new(&client, &table, &links);
        let descriptors: Vec<ResourceDescriptor> = default_descriptors()
            .into_iter()
            .filter(|d| d.resource_type == ResourceType::VariableGroup)
            .collect();

        let mut inventory = Inventory::new(&descriptors);
        crawler.crawl(&mut inventory, &descriptors).await;
        assert_eq!(inventory.count(ResourceType::VariableGroup), 2);
        let shared = inventory.get(ResourceType::VariableGroup, "1").unwrap();
        assert_eq!(shared.k_project.as_ref().unwrap().id, "p1");

        crawler.crawl(&mut inventory, &descriptors).await;
        assert_eq!(inventory.count(ResourceType::VariableGroup), 2);
    }

    #[tokio::test]
    async fn failed_listing_is_skipped() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/Contoso/p1/_apis/distributedtask/securefiles")
            .match_query(Matcher::Any)
            .with_status(401)
            .create_async()
            .await;
        mock_listing(
            &mut server,
            "/Contoso/p2/_apis/distributedtask/securefiles",
            json!([{"id": "sf-1", "name": "signing.pfx"}]),
        )
        .await;

        let client = client_for(&server.url());
        let table = projects(&[("p1", "Web"), ("p2", "Mobile")]);
        let links = links(&server.url());
        let crawler = InventoryCrawler::new(&client, &table, &links);
        let descriptors: Vec<ResourceDescriptor> = default_descriptors()
            .into_iter()
            .filter(|d| d.resource_type == ResourceType::SecureFile)
            .collect();

        let mut inventory = Inventory::new(&descriptors);
        crawler.crawl(&mut inventory, &descriptors).await;
        assert_eq!(inventory.count(ResourceType::SecureFile), 1);
    }

    #[tokio::test]
    async fn environments_are_read_in_detail() {
        let mut server = mockito::Server::new_async().await;
        mock_listing(
            &mut server,
            "/Contoso/p1/_apis/distributedtask/environments",
            json!([{"id": 4, "name": "prod"}]),
        )
        .await;
        server
            .mock("GET", "/Contoso/p1/_apis/distributedtask/environments/4")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"id": 4, "name": "prod", "resources": [{"id": 1, "type": "kubernetes"}]}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let table = projects(&[("p1", "Web")]);
        let links = links(&server.url());
        let crawler = InventoryCrawler::new(&client, &table, &links);
        let descriptors: Vec<ResourceDescriptor> = default_descriptors()
            .into_iter()
            .filter(|d| d.resource_type == ResourceType::Environment)
            .collect();

        let mut inventory = Inventory::new(&descriptors);
        crawler.crawl(&mut inventory, &descriptors).await;

        let environment = inventory.get(ResourceType::Environment, "4").unwrap();
        assert_eq!(environment.extra["resources"][0]["type"], json!("kubernetes"));
    }

    #[tokio::test]
    async fn repositories_get_stats() {
        let mut server = mockito::Server::new_async().await;
        mock_listing(
            &mut server,
            "/Contoso/_apis/git/repositories/r1/refs",
            json!([{"name": "refs/heads/main"}, {"name": "refs/heads/dev"}]),
        )
        .await;
        mock_listing(
            &mut server,
            "/Contoso/p1/_apis/git/repositories/r1/commits",
            json!([{"commitId": "a", "committer": {"date": "2024-05-01T00:00:00Z"}}]),
        )
        .await;
        mock_listing(
            &mut server,
            "/Contoso/p1/_apis/git/repositories/r1/pullrequests",
            json!([{"status": "active"}, {"status": "completed"}]),
        )
        .await;

        let client = client_for(&server.url());
        let table = projects(&[("p1", "Web")]);
        let links = links(&server.url());
        let crawler = InventoryCrawler::new(&client, &table, &links);

        let raw = json!({"id": "r1", "name": "Repo1", "project": {"id": "p1", "name": "Web"}});
        let repository = crawler.build_resource(
            ResourceType::Repository,
            raw.as_object().unwrap().clone(),
            table.get("p1"),
        );
        let mut inventory = Inventory::new(&default_descriptors());
        inventory.insert(repository);

        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        crawler.enrich_repositories(&mut inventory, 100, now).await;

        let repository = inventory.get(ResourceType::Repository, "r1").unwrap();
        let ResourceDetails::Repository { branches, stats, .. } = &repository.details else {
            panic!("not a repository");
        };
        let stats = stats.as_ref().unwrap();
        assert_eq!(branches.len(), 2);
        assert_eq!(stats.branches, 2);
        assert_eq!(stats.age, Some(31));
        assert_eq!(stats.state, crate::providers::azure_devops::types::ActivityState::Active);
        assert_eq!(stats.pull_requests.all, 2);
    }
}
