use chrono::{DateTime, Utc};
use serde_json::Value;

use super::client::{items, AzureDevOpsClient};
use super::types::{ActivityState, PullRequestCounts};
use crate::error::Result;

const GIT_API_VERSION: &str = "7.1";
const BRANCH_PREFIX: &str = "refs/heads/";

/// Repositories untouched for longer than this are stale.
pub const ACTIVE_WITHIN_DAYS: i64 = 90;
/// Repositories untouched for longer than this are dormant.
pub const STALE_WITHIN_DAYS: i64 = 365;

/// Branch refs of a repository. Repository ids are unique across the organization.
pub async fn list_branches(client: &AzureDevOpsClient, repository_id: &str) -> Result<Vec<Value>> {
    let url = client.org_url(
        &format!("git/repositories/{repository_id}/refs"),
        &[("filter", "heads/"), ("api-version", GIT_API_VERSION)],
    )?;
    client.fetch_all(&url).await
}

/// `refs/heads/release/1.0` -> `release/1.0`
pub fn branch_name(reference: &str) -> &str {
    reference.strip_prefix(BRANCH_PREFIX).unwrap_or(reference)
}

pub fn branch_ref(name: &str) -> String {
    if name.starts_with(BRANCH_PREFIX) {
        name.to_string()
    } else {
        format!("{BRANCH_PREFIX}{name}")
    }
}

/// Date of the newest (or, with `oldest_first`, the oldest) commit on the default branch.
pub async fn boundary_commit_date(
    client: &AzureDevOpsClient,
    project_id: &str,
    repository_id: &str,
    oldest_first: bool,
) -> Result<Option<DateTime<Utc>>> {
    let mut query = vec![("searchCriteria.$top", "1"), ("api-version", GIT_API_VERSION)];
    if oldest_first {
        query.push(("searchCriteria.showOldestCommitsFirst", "true"));
    }
    let url = client.project_url(
        project_id,
        &format!("git/repositories/{repository_id}/commits"),
        &query,
    )?;

    let commits = items(client.fetch(&url).await?);
    Ok(commits.first().and_then(commit_date))
}

fn commit_date(commit: &Value) -> Option<DateTime<Utc>> {
    let raw = commit.pointer("/committer/date")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|date| date.with_timezone(&Utc))
}

/// Commits of a repository since `from_date`, with push metadata.
pub async fn list_commits_since(
    client: &AzureDevOpsClient,
    project_id: &str,
    repository_id: &str,
    from_date: DateTime<Utc>,
    page_size: usize,
) -> Result<Vec<Value>> {
    let from = from_date.format("%Y-%m-%dT%H:%M:%SZ").to_string();
    let url = client.project_url(
        project_id,
        &format!("git/repositories/{repository_id}/commits"),
        &[
            ("searchCriteria.fromDate", from.as_str()),
            ("searchCriteria.includePushData", "true"),
            ("api-version", GIT_API_VERSION),
        ],
    )?;
    client.fetch_paged(&url, page_size).await
}

pub async fn pull_request_counts(
    client: &AzureDevOpsClient,
    project_id: &str,
    repository_id: &str,
    page_size: usize,
) -> Result<PullRequestCounts> {
    let url = client.project_url(
        project_id,
        &format!("git/repositories/{repository_id}/pullrequests"),
        &[("searchCriteria.status", "all"), ("api-version", GIT_API_VERSION)],
    )?;
    let pull_requests = client.fetch_paged(&url, page_size).await?;
    Ok(tally_pull_requests(&pull_requests))
}

pub fn tally_pull_requests(pull_requests: &[Value]) -> PullRequestCounts {
    let mut counts = PullRequestCounts::default();
    for pr in pull_requests {
        match pr.get("status").and_then(Value::as_str) {
            Some("active") => counts.active += 1,
            Some("abandoned") => counts.abandoned += 1,
            Some("completed") => counts.completed += 1,
            _ => counts.other += 1,
        }
        counts.all += 1;
    }
    counts
}

/// Classifies a repository by the age of its last commit.
pub fn activity_state(last_commit: Option<DateTime<Utc>>, now: DateTime<Utc>) -> ActivityState {
    let Some(last_commit) = last_commit else {
        return ActivityState::Unknown;
    };
    let age = (now - last_commit).num_days();
    if age <= ACTIVE_WITHIN_DAYS {
        ActivityState::Active
    } else if age <= STALE_WITHIN_DAYS {
        ActivityState::Stale
    } else {
        ActivityState::Dormant
    }
}
