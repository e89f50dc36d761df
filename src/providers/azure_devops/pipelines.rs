use indexmap::IndexMap;
use log::{debug, info, warn};
use serde_json::{json, Map, Value};

use super::client::{items, AzureDevOpsClient};
use super::git::{branch_name, branch_ref, list_branches};
use super::projects::ProjectTable;
use super::types::{id_string, Build, PipelineDefinition, PipelineKey, PreviewResult, Project};
use crate::error::Result;

const BUILD_API_VERSION: &str = "7.1";
const PREVIEW_API_VERSION: &str = "7.1-preview.1";
const RESOURCES_API_VERSION: &str = "7.2-preview.1";

/// Which branches of a definition's repository get a preview run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchSelection {
    All,
    DefaultOnly,
    /// The default branch plus up to N others, in listing order.
    Top(usize),
}

impl BranchSelection {
    /// `-1` (or any negative) selects all branches, `0` only the default one.
    pub fn from_top_branches(top_branches: i64) -> Self {
        match top_branches {
            n if n < 0 => Self::All,
            0 => Self::DefaultOnly,
            n => Self::Top(usize::try_from(n).unwrap_or(usize::MAX)),
        }
    }

    pub fn select(self, branches: &[String], default_branch: Option<&str>) -> Vec<String> {
        let default_branch = default_branch
            .map(str::to_string)
            .or_else(|| branches.first().cloned());
        let others = branches
            .iter()
            .filter(|branch| Some(branch.as_str()) != default_branch.as_deref())
            .cloned();

        match self {
            Self::All => default_branch.iter().cloned().chain(others).collect(),
            Self::DefaultOnly => default_branch.iter().cloned().collect(),
            Self::Top(limit) => default_branch.iter().cloned().chain(others.take(limit)).collect(),
        }
    }
}

/// Pipeline definitions and their builds across all well-formed projects.
#[derive(Debug, Clone, Default)]
pub struct PipelineCatalog {
    pub definitions: Vec<PipelineDefinition>,
    pub builds: Vec<Build>,
}

pub struct PipelineDiscovery<'a> {
    client: &'a AzureDevOpsClient,
    projects: &'a ProjectTable,
    selection: BranchSelection,
}

impl<'a> PipelineDiscovery<'a> {
    pub fn new(client: &'a AzureDevOpsClient, projects: &'a ProjectTable, selection: BranchSelection) -> Self {
        Self {
            client,
            projects,
            selection,
        }
    }

    /// Lists definitions per project, reads each in detail, then its builds and previews.
    pub async fn discover(&self) -> PipelineCatalog {
        let mut catalog = PipelineCatalog::default();

        for project in self.projects.well_formed() {
            let listed = match self.list_definitions(project).await {
                Ok(listed) => listed,
                Err(e) => {
                    warn!("Could not list build definitions of {}: {e}", project.name);
                    continue;
                }
            };
            info!("{} build definitions in {}", listed.len(), project.name);

            for summary in listed {
                let Some(definition_id) = summary.get("id").and_then(id_string) else {
                    continue;
                };
                let mut definition = match self.definition_detail(project, &definition_id).await {
                    Ok(definition) => definition,
                    Err(e) => {
                        warn!("Could not read build definition {definition_id} of {}: {e}", project.name);
                        continue;
                    }
                };

                definition.k_key = PipelineKey::new(project.id.as_str(), definition_id.as_str());
                definition.k_project = self.projects.project_ref(&project.id, None);
                definition.builds.metrics = self.definition_metrics(project, &definition_id).await;

                let builds = self.definition_builds(project, &definition_id).await;
                definition.builds.builds = builds
                    .iter()
                    .filter(|build| build.yaml.is_some())
                    .map(|build| build.id.to_string())
                    .collect();
                definition.builds.preview = self.previews(project, &mut definition, &builds).await;

                catalog.builds.extend(builds);
                catalog.definitions.push(definition);
            }
        }

        catalog
    }

    async fn list_definitions(&self, project: &Project) -> Result<Vec<Value>> {
        let url = self.client.project_url(
            &project.id,
            "build/definitions",
            &[("api-version", BUILD_API_VERSION)],
        )?;
        self.client.fetch_all(&url).await
    }

    async fn definition_detail(&self, project: &Project, definition_id: &str) -> Result<PipelineDefinition> {
        let url = self.client.project_url(
            &project.id,
            &format!("build/definitions/{definition_id}"),
            &[("api-version", BUILD_API_VERSION)],
        )?;
        Ok(serde_json::from_value(self.client.fetch(&url).await?)?)
    }

    async fn definition_metrics(&self, project: &Project, definition_id: &str) -> Option<Value> {
        let url = self
            .client
            .project_url(
                &project.id,
                &format!("build/definitions/{definition_id}/metrics"),
                &[("api-version", PREVIEW_API_VERSION)],
            )
            .ok()?;
        match self.client.fetch(&url).await {
            Ok(metrics) => Some(Value::Array(items(metrics))),
            Err(e) => {
                debug!("No metrics for definition {definition_id}: {e}");
                None
            }
        }
    }

    /// Builds of a definition, each with the YAML of its first log.
    async fn definition_builds(&self, project: &Project, definition_id: &str) -> Vec<Build> {
        let listed = match self.client.project_url(
            &project.id,
            "build/builds",
            &[("definitions", definition_id), ("api-version", BUILD_API_VERSION)],
        ) {
            Ok(url) => self.client.fetch_all(&url).await,
            Err(e) => Err(e),
        };
        let listed = listed.unwrap_or_else(|e| {
            warn!("Could not list builds of definition {definition_id}: {e}");
            Vec::new()
        });
        debug!("{} builds for definition {definition_id}", listed.len());

        let mut builds = Vec::with_capacity(listed.len());
        for raw in listed {
            let mut build: Build = match serde_json::from_value(raw) {
                Ok(build) => build,
                Err(e) => {
                    warn!("Skipping malformed build of definition {definition_id}: {e}");
                    continue;
                }
            };
            build.k_project = self.projects.project_ref(&project.id, None);
            build.k_key = format!("{}_{}", project.id, build.id);

            match self.first_log(project, build.id).await {
                Ok(log) => {
                    build.pipeline_recipe = parse_pipeline_yaml(&log);
                    build.yaml = Some(log);
                }
                Err(e) => debug!("No log for build {}: {e}", build.id),
            }
            builds.push(build);
        }
        builds
    }

    async fn first_log(&self, project: &Project, build_id: u64) -> Result<String> {
        let url = self.client.project_url(
            &project.id,
            &format!("build/builds/{build_id}/logs/1"),
            &[("api-version", BUILD_API_VERSION)],
        )?;
        self.client.fetch_text(&url).await
    }

    /// Preview per selected branch. Designer definitions lose their designer-only process fields.
    async fn previews(
        &self,
        project: &Project,
        definition: &mut PipelineDefinition,
        builds: &[Build],
    ) -> IndexMap<String, PreviewResult> {
        if definition.is_designer() {
            if let Some(Value::Object(process)) = definition.process.as_mut() {
                process.remove("phases");
                process.remove("target");
            }
        }

        let Some(repository) = definition.repository.as_ref() else {
            return IndexMap::new();
        };
        let branches = if repository.is_azure_repos() {
            match list_branches(self.client, &repository.id).await {
                Ok(refs) => refs
                    .iter()
                    .filter_map(|reference| reference.get("name").and_then(Value::as_str))
                    .map(|reference| branch_name(reference).to_string())
                    .collect(),
                Err(e) => {
                    warn!("Could not list branches of {}: {e}", repository.name);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        let default_branch = repository.default_branch.as_deref().map(branch_name);

        let mut previews = IndexMap::new();
        for branch in self.selection.select(&branches, default_branch) {
            let result = if definition.is_disabled() {
                unavailable("Build Definition is disabled")
            } else if definition.is_designer() {
                unavailable("Designer pipelines have no YAML preview")
            } else {
                self.preview(project, definition, &branch, builds).await
            };
            previews.insert(branch, result);
        }
        previews
    }

    async fn preview(
        &self,
        project: &Project,
        definition: &PipelineDefinition,
        branch: &str,
        builds: &[Build],
    ) -> PreviewResult {
        let payload = preview_payload(branch, latest_build(builds, branch));
        let response = match self.client.project_url(
            &project.id,
            &format!("pipelines/{}/preview", definition.id),
            &[("api-version", BUILD_API_VERSION)],
        ) {
            Ok(url) => self.client.post(&url, &payload).await,
            Err(e) => Err(e),
        };

        match response {
            Ok(response) => match response.get("finalYaml").and_then(Value::as_str) {
                Some(yaml) => available(yaml.to_string()),
                None => self.exported_yaml(project, definition.id).await,
            },
            Err(e) => {
                debug!("Preview of {} on {branch} failed: {e}", definition.name);
                PreviewResult {
                    yaml: Some(format!("Could not get YAML PREVIEW - {e}")),
                    error: Some(e.to_string()),
                    ..PreviewResult::default()
                }
            }
        }
    }

    async fn exported_yaml(&self, project: &Project, definition_id: u64) -> PreviewResult {
        let exported = match self.client.project_url(
            &project.id,
            &format!("build/definitions/{definition_id}/yaml"),
            &[("api-version", BUILD_API_VERSION)],
        ) {
            Ok(url) => self.client.fetch(&url).await,
            Err(e) => Err(e),
        };
        match exported {
            Ok(exported) => match exported.get("yaml").and_then(Value::as_str) {
                Some(yaml) => available(yaml.to_string()),
                None => unavailable("Empty YAML PREVIEW"),
            },
            Err(e) => {
                debug!("No exported YAML for definition {definition_id}: {e}");
                unavailable("Empty YAML PREVIEW")
            }
        }
    }

    /// Resources each definition reports being authorized for.
    pub async fn attach_authorized_resources(&self, definitions: &mut [PipelineDefinition]) {
        for definition in definitions {
            let key = definition.k_key.clone();
            let resources = match self.client.project_url(
                key.project_id(),
                &format!("build/definitions/{}/resources", key.definition_id()),
                &[("api-version", RESOURCES_API_VERSION)],
            ) {
                Ok(url) => self.client.fetch(&url).await,
                Err(e) => Err(e),
            };
            definition.resources = match resources {
                Ok(resources) => items(resources),
                Err(e) => {
                    warn!("Could not read authorized resources of {key}: {e}");
                    Vec::new()
                }
            };
        }
    }

    /// Artifacts of every build, tagged with the build's project and key.
    pub async fn collect_artifacts(&self, builds: &[Build]) -> Vec<Value> {
        let mut artifacts = Vec::new();
        for build in builds {
            let Some(project_id) = build.project_id() else {
                continue;
            };
            let listed = match self.client.project_url(
                project_id,
                &format!("build/builds/{}/artifacts", build.id),
                &[("api-version", BUILD_API_VERSION)],
            ) {
                Ok(url) => self.client.fetch(&url).await,
                Err(e) => Err(e),
            };
            match listed {
                Ok(listed) => artifacts.extend(items(listed).into_iter().map(|artifact| tag_artifact(artifact, build))),
                Err(e) => debug!("No artifacts for build {}: {e}", build.id),
            }
        }
        artifacts
    }
}

/// Build and release tasks installed in the organization.
pub async fn list_tasks(client: &AzureDevOpsClient) -> Result<Vec<Value>> {
    let url = client.org_url("distributedtask/tasks", &[("api-version", BUILD_API_VERSION)])?;
    Ok(items(client.fetch(&url).await?))
}

fn tag_artifact(artifact: Value, build: &Build) -> Value {
    let Value::Object(mut fields) = artifact else {
        return artifact;
    };
    fields.insert(
        "k_project".to_string(),
        serde_json::to_value(&build.k_project).unwrap_or(Value::Null),
    );
    fields.insert("k_build_key".to_string(), Value::String(build.k_key.clone()));
    Value::Object(fields)
}

fn available(yaml: String) -> PreviewResult {
    PreviewResult {
        pipeline_recipe: parse_pipeline_yaml(&yaml),
        yaml: Some(yaml),
        is_yaml_preview_available: true,
        error: None,
    }
}

fn unavailable(note: &str) -> PreviewResult {
    PreviewResult {
        yaml: Some(note.to_string()),
        ..PreviewResult::default()
    }
}

/// Parses pipeline YAML; empty or invalid input gives `None`.
pub fn parse_pipeline_yaml(content: &str) -> Option<serde_yaml::Value> {
    if content.trim().is_empty() {
        return None;
    }
    match serde_yaml::from_str(content) {
        Ok(recipe) => Some(recipe),
        Err(e) => {
            debug!("Pipeline YAML did not parse: {e}");
            None
        }
    }
}

/// Most recently finished build on `branch`.
pub fn latest_build<'b>(builds: &'b [Build], branch: &str) -> Option<&'b Build> {
    let reference = branch_ref(branch);
    builds
        .iter()
        .filter(|build| build.source_branch.as_deref() == Some(reference.as_str()))
        .filter(|build| build.finish_time.is_some())
        .max_by(|a, b| a.finish_time.cmp(&b.finish_time))
}

/// Preview-run request for `branch`, seeded from the latest build's parameters and variables.
pub fn preview_payload(branch: &str, latest: Option<&Build>) -> Value {
    let template_parameters = latest
        .and_then(|build| build.template_parameters.as_ref())
        .map(|parameters| match parameters {
            Value::String(encoded) => serde_json::from_str(encoded).unwrap_or_else(|_| json!({})),
            other => other.clone(),
        })
        .unwrap_or_else(|| json!({}));

    let variables: Map<String, Value> = latest
        .and_then(|build| build.variables.as_ref())
        .and_then(Value::as_object)
        .map(|variables| {
            variables
                .iter()
                .filter_map(|(name, variable)| Some((name.clone(), variable.get("value")?.clone())))
                .collect()
        })
        .unwrap_or_default();
    let builds = if variables.is_empty() {
        json!({})
    } else {
        json!({ "variables": variables })
    };

    json!({
        "resources": {
            "pipelines": {},
            "repositories": { "self": { "refName": branch_ref(branch) } },
            "builds": builds,
            "containers": {},
            "packages": {}
        },
        "templateParameters": template_parameters,
        "previewRun": true,
        "yamlOverride": ""
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::azure_devops::test_support::{client_for, projects};
    use mockito::Matcher;

    fn build(value: Value) -> Build {
        serde_json::from_value(value).unwrap()
    }

    mod branch_selection {
        use super::*;

        fn branches() -> Vec<String> {
            ["feature/a", "main", "release/1", "hotfix"]
                .iter()
                .map(ToString::to_string)
                .collect()
        }

        #[test]
        fn negative_selects_everything_default_first() {
            let selection = BranchSelection::from_top_branches(-1);
            assert_eq!(selection, BranchSelection::All);
            assert_eq!(
                selection.select(&branches(), Some("main")),
                vec!["main", "feature/a", "release/1", "hotfix"]
            );
        }

        #[test]
        fn zero_selects_default_only() {
            let selection = BranchSelection::from_top_branches(0);
            assert_eq!(selection.select(&branches(), Some("main")), vec!["main"]);
            assert_eq!(selection.select(&[], Some("main")), vec!["main"]);
            assert!(selection.select(&[], None).is_empty());
        }

        #[test]
        fn top_n_adds_others_in_listing_order() {
            let selection = BranchSelection::from_top_branches(2);
            assert_eq!(
                selection.select(&branches(), Some("main")),
                vec!["main", "feature/a", "release/1"]
            );
        }
    }

    #[test]
    fn payload_uses_latest_finished_build_on_branch() {
        let builds = vec![
            build(json!({
                "id": 1,
                "sourceBranch": "refs/heads/main",
                "finishTime": "2024-01-01T10:00:00Z",
                "templateParameters": "{\"env\": \"old\"}"
            })),
            build(json!({
                "id": 2,
                "sourceBranch": "refs/heads/main",
                "finishTime": "2024-02-01T10:00:00Z",
                "templateParameters": {"env": "prod"},
                "variables": {"region": {"value": "westeu"}, "broken": {}}
            })),
            build(json!({"id": 3, "sourceBranch": "refs/heads/main"})),
            build(json!({"id": 4, "sourceBranch": "refs/heads/dev", "finishTime": "2025-01-01T00:00:00Z"})),
        ];

        let latest = latest_build(&builds, "main").unwrap();
        assert_eq!(latest.id, 2);

        let payload = preview_payload("main", Some(latest));
        assert_eq!(payload["templateParameters"], json!({"env": "prod"}));
        assert_eq!(payload["resources"]["builds"], json!({"variables": {"region": "westeu"}}));
        assert_eq!(payload["resources"]["repositories"]["self"]["refName"], json!("refs/heads/main"));
        assert_eq!(payload["previewRun"], json!(true));
    }

    #[test]
    fn payload_without_history_is_empty() {
        let payload = preview_payload("dev", None);
        assert_eq!(payload["templateParameters"], json!({}));
        assert_eq!(payload["resources"]["builds"], json!({}));
    }

    #[test]
    fn parse_pipeline_yaml_handles_empty_and_invalid() {
        assert!(parse_pipeline_yaml("   ").is_none());
        assert!(parse_pipeline_yaml("steps: [unclosed").is_none());
        let recipe = parse_pipeline_yaml("trigger:\n  - main\nsteps:\n  - script: make\n").unwrap();
        assert_eq!(recipe["steps"][0]["script"], serde_yaml::Value::from("make"));
    }

    #[tokio::test]
    async fn discovers_definitions_builds_and_previews() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/Contoso/P1/_apis/build/definitions")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"count": 1, "value": [{"id": 5, "name": "ci"}]}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/Contoso/P1/_apis/build/definitions/5")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(
                json!({
                    "id": 5,
                    "name": "ci",
                    "queueStatus": "enabled",
                    "process": {"type": 2, "yamlFilename": "azure-pipelines.yml"},
                    "repository": {"id": "Repo1", "name": "Repo1", "type": "TfsGit", "defaultBranch": "refs/heads/main"}
                })
                .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("GET", "/Contoso/P1/_apis/build/definitions/5/metrics")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"count": 0, "value": []}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/Contoso/P1/_apis/build/builds")
            .match_query(Matcher::UrlEncoded("definitions".into(), "5".into()))
            .with_status(200)
            .with_body(
                json!({"count": 1, "value": [{
                    "id": 77,
                    "definition": {"id": 5, "project": {"id": "P1"}},
                    "repository": {"id": "Repo1"},
                    "sourceBranch": "refs/heads/main",
                    "finishTime": "2024-02-01T10:00:00Z"
                }]})
                .to_string(),
            )
            .create_async()
            .await;
        server
            .mock("GET", "/Contoso/P1/_apis/build/builds/77/logs/1")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body("steps:\n  - script: echo hi\n")
            .create_async()
            .await;
        server
            .mock("GET", "/Contoso/_apis/git/repositories/Repo1/refs")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"count": 2, "value": [{"name": "refs/heads/main"}, {"name": "refs/heads/dev"}]}"#)
            .create_async()
            .await;
        let preview = server
            .mock("POST", "/Contoso/P1/_apis/pipelines/5/preview")
            .match_query(Matcher::Any)
            .match_body(Matcher::PartialJson(json!({
                "resources": {"repositories": {"self": {"refName": "refs/heads/main"}}}
            })))
            .with_status(200)
            .with_body(r#"{"finalYaml": "steps:\n- script: echo hi\n"}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let table = projects(&[("P1", "One")]);
        let discovery = PipelineDiscovery::new(&client, &table, BranchSelection::DefaultOnly);
        let catalog = discovery.discover().await;

        assert_eq!(catalog.definitions.len(), 1);
        let definition = &catalog.definitions[0];
        assert_eq!(definition.k_key.to_string(), "P1_5");
        assert_eq!(definition.builds.builds, vec!["77"]);
        let main = &definition.builds.preview["main"];
        assert!(main.is_yaml_preview_available);
        assert!(main.pipeline_recipe.is_some());
        assert_eq!(definition.builds.preview.len(), 1);

        assert_eq!(catalog.builds.len(), 1);
        assert_eq!(catalog.builds[0].k_key, "P1_77");
        assert_eq!(catalog.builds[0].definition_key().unwrap().to_string(), "P1_5");
        assert!(catalog.builds[0].pipeline_recipe.is_some());
        preview.assert_async().await;
    }

    #[tokio::test]
    async fn disabled_definition_is_recorded_without_preview() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/Contoso/_apis/git/repositories/Repo1/refs")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"count": 1, "value": [{"name": "refs/heads/main"}]}"#)
            .create_async()
            .await;
        let preview = server
            .mock("POST", Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let table = projects(&[("P1", "One")]);
        let discovery = PipelineDiscovery::new(&client, &table, BranchSelection::All);

        let mut definition: PipelineDefinition = serde_json::from_value(json!({
            "id": 8,
            "name": "legacy",
            "queueStatus": "disabled",
            "process": {"type": 1, "phases": [{"name": "Agent job"}], "target": {}},
            "repository": {"id": "Repo1", "name": "Repo1", "type": "TfsGit"}
        }))
        .unwrap();
        let project = table.get("P1").unwrap();
        let previews = discovery.previews(project, &mut definition, &[]).await;

        assert_eq!(previews["main"].yaml.as_deref(), Some("Build Definition is disabled"));
        assert!(!previews["main"].is_yaml_preview_available);
        let process = definition.process.unwrap();
        assert!(process.get("phases").is_none());
        assert!(process.get("target").is_none());
        preview.assert_async().await;
    }

    #[tokio::test]
    async fn artifacts_are_tagged_with_their_build() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/Contoso/P1/_apis/build/builds/77/artifacts")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"count": 1, "value": [{"id": 1, "name": "drop"}]}"#)
            .create_async()
            .await;

        let client = client_for(&server.url());
        let table = projects(&[("P1", "One")]);
        let discovery = PipelineDiscovery::new(&client, &table, BranchSelection::All);

        let mut finished = build(json!({"id": 77}));
        finished.k_project = table.project_ref("P1", None);
        finished.k_key = "P1_77".to_string();

        let artifacts = discovery.collect_artifacts(&[finished]).await;
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0]["k_build_key"], json!("P1_77"));
        assert_eq!(artifacts[0]["k_project"]["id"], json!("P1"));
    }
}
