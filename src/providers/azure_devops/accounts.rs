use log::info;
use serde_json::Value;

use super::client::AzureDevOpsClient;
use super::commits::BUILD_IDENTITY_PREFIX;
use super::types::BuildServiceAccount;
use crate::error::Result;

/// Build-service identities of the organization, from the graph service-account listing.
pub async fn build_service_accounts(client: &AzureDevOpsClient) -> Result<Vec<BuildServiceAccount>> {
    let url = client.identity_url(
        "graph/users",
        &[("subjectTypes", "svc"), ("api-version", "7.1-preview.1")],
    )?;
    let users = client.fetch_all(&url).await?;

    let accounts: Vec<BuildServiceAccount> = users
        .iter()
        .filter_map(|user| account_from_user(user, client.organization()))
        .collect();
    info!("Found {} build service accounts", accounts.len());
    Ok(accounts)
}

/// Maps a graph user in the `Build` domain to a build-service account.
///
/// The project name is the display name minus ` Build Service (<org>)`.
pub fn account_from_user(user: &Value, organization: &str) -> Option<BuildServiceAccount> {
    if user.get("domain").and_then(Value::as_str) != Some("Build") {
        return None;
    }
    let principal_name = user.get("principalName").and_then(Value::as_str).unwrap_or_default();
    let display_name = user.get("displayName").and_then(Value::as_str).unwrap_or_default();

    let suffix = format!(" Build Service ({organization})");
    let project_name = display_name
        .strip_suffix(suffix.as_str())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string);
    let description = match &project_name {
        Some(project) => format!("A build service account for project {project}."),
        None => "A build service account for an unknown project.".to_string(),
    };

    Some(BuildServiceAccount {
        id: format!("{BUILD_IDENTITY_PREFIX}{principal_name}"),
        name: display_name.to_string(),
        project_name,
        description,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::azure_devops::test_support::client_for;
    use mockito::Matcher;
    use serde_json::json;

    #[test]
    fn test_project_build_service() {
        let account = account_from_user(
            &json!({
                "domain": "Build",
                "principalName": "0f9a3c1e-1111-2222-3333-444455556666",
                "displayName": "Web Build Service (Contoso)"
            }),
            "Contoso",
        )
        .unwrap();

        assert_eq!(account.id, "Build\\0f9a3c1e-1111-2222-3333-444455556666");
        assert_eq!(account.project_name.as_deref(), Some("Web"));
        assert_eq!(account.description, "A build service account for project Web.");
    }

    #[test]
    fn test_unexpected_display_name() {
        let account = account_from_user(
            &json!({
                "domain": "Build",
                "principalName": "abc",
                "displayName": "Project Collection Build Service (Contoso)"
            }),
            "Fabrikam",
        )
        .unwrap();

        assert_eq!(account.project_name, None);
        assert_eq!(account.description, "A build service account for an unknown project.");
    }

    #[test]
    fn test_other_domains_are_ignored() {
        let user = json!({"domain": "AgentPool", "principalName": "x", "displayName": "Agent"});
        assert!(account_from_user(&user, "Contoso").is_none());
    }

    #[test]
    fn test_lists_service_accounts_from_graph() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/Contoso/_apis/graph/users")
            .match_query(Matcher::UrlEncoded("subjectTypes".into(), "svc".into()))
            .with_status(200)
            .with_body(
                json!({"count": 2, "value": [
                    {"domain": "Build", "principalName": "p1", "displayName": "Web Build Service (Contoso)"},
                    {"domain": "AgentPool", "principalName": "p2", "displayName": "Agent Pool Service"}
                ]})
                .to_string(),
            )
            .create();

        let client = client_for(&server.url());
        let accounts = tokio_test::block_on(build_service_accounts(&client)).unwrap();
        assert_eq!(accounts.len(), 1);
        assert_eq!(accounts[0].name, "Web Build Service (Contoso)");
        mock.assert();
    }
}
