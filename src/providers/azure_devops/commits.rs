use chrono::{DateTime, Duration, Utc};
use indexmap::{IndexMap, IndexSet};
use log::{info, warn};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};

use super::client::AzureDevOpsClient;
use super::git::list_commits_since;
use super::inventory::Inventory;
use super::types::{
    BuildServiceAccount, ChangeCounts, Commit, CommitterProjectStats, CommitterStats,
    RepositoryCommitters, RepositoryStats, Resource, ResourceDetails, ResourceType,
};

/// Identity Azure DevOps pushes completed pull-request merges as.
pub const AUTOMATED_MERGE_IDENTITY: &str =
    "00000002-0000-8888-8000-000000000000@2c895908-04e0-4952-89fd-54b0046d6288";

/// Pusher names of build-service identities start with this.
pub const BUILD_IDENTITY_PREFIX: &str = "Build\\";

/// Commits of every repository from the last `lookback_days`, with push data.
pub async fn collect_commits(
    client: &AzureDevOpsClient,
    inventory: &Inventory,
    lookback_days: i64,
    page_size: usize,
    now: DateTime<Utc>,
) -> Vec<Commit> {
    let since = now - Duration::days(lookback_days);
    let mut commits = Vec::new();

    for repository in inventory.resources(ResourceType::Repository) {
        let Some(project_id) = repository.owning_project_id() else {
            continue;
        };
        match list_commits_since(client, project_id, &repository.id, since, page_size).await {
            Ok(raw) => commits.extend(raw.iter().map(|commit| commit_from_raw(commit, repository))),
            Err(e) => warn!("Could not list commits of {}: {e}", repository.name),
        }
    }

    info!("Collected {} commits from the last {lookback_days} days", commits.len());
    commits
}

pub fn commit_from_raw(raw: &Value, repository: &Resource) -> Commit {
    let text = |pointer: &str| raw.pointer(pointer).and_then(Value::as_str).map(str::to_string);
    let count = |kind: &str| {
        raw.get("changeCounts")
            .and_then(|counts| counts.get(kind))
            .and_then(Value::as_u64)
            .unwrap_or(0)
    };

    let author_name = text("/author/name");
    let committer_name = text("/committer/name");
    let push_email = text("/push/pushedBy/uniqueName");
    let push_name = text("/push/pushedBy/displayName");

    Commit {
        repository_id: repository.id.clone(),
        repository_name: repository.name.clone(),
        project_id: repository.owning_project_id().unwrap_or_default().to_string(),
        k_project: repository.k_project.clone(),
        commit_id: text("/commitId"),
        author_email: text("/author/email"),
        committer_email: text("/committer/email"),
        committer_date: text("/committer/date"),
        change_counts: ChangeCounts {
            add: count("Add"),
            edit: count("Edit"),
            delete: count("Delete"),
        },
        push_id: raw.pointer("/push/pushId").and_then(Value::as_u64),
        push_date: text("/push/date"),
        committer_author_match: committer_name == author_name,
        committer_pusher_match: committer_name == push_name,
        commit_by_ado: push_email.as_deref() == Some(AUTOMATED_MERGE_IDENTITY),
        author_name,
        committer_name,
        push_email,
    }
}

#[derive(Default)]
struct CommitterTally {
    stats: CommitterStats,
    repositories: IndexSet<String>,
    projects: IndexMap<String, ProjectTally>,
    authors: IndexSet<String>,
    pushers: IndexSet<String>,
}

struct ProjectTally {
    name: Option<String>,
    repositories: IndexSet<String>,
    commits: usize,
}

/// Rolls commits up per committer email.
///
/// Build-service pushers are shown by display name and set `usesBuildServiceAccount`.
/// Pushes by [`AUTOMATED_MERGE_IDENTITY`] count as merged pull requests and are not listed as pushers.
pub fn committer_stats(
    commits: &[Commit],
    accounts: &[BuildServiceAccount],
) -> IndexMap<String, CommitterStats> {
    let account_names: HashMap<&str, &str> = accounts
        .iter()
        .map(|account| (account.id.as_str(), account.name.as_str()))
        .collect();

    let mut tallies: IndexMap<String, CommitterTally> = IndexMap::new();
    for commit in commits {
        let Some(email) = commit.committer_email.as_deref().filter(|e| !e.is_empty()) else {
            continue;
        };
        let tally = tallies.entry(email.to_string()).or_default();

        tally.stats.commit_count += 1;
        tally.stats.total_change_counts += commit.change_counts;
        tally.repositories.insert(commit.repository_id.clone());
        if let Some(author) = &commit.author_email {
            tally.authors.insert(author.clone());
        }
        if let Some(pusher) = &commit.push_email {
            let build_account = pusher
                .starts_with(BUILD_IDENTITY_PREFIX)
                .then(|| account_names.get(pusher.as_str()))
                .flatten();
            if pusher == AUTOMATED_MERGE_IDENTITY {
                tally.stats.prs_merged += 1;
            } else if let Some(name) = build_account {
                tally.stats.uses_build_service_account = true;
                tally.pushers.insert((*name).to_string());
            } else {
                tally.pushers.insert(pusher.clone());
            }
        }

        if !commit.project_id.is_empty() {
            let project = tally
                .projects
                .entry(commit.project_id.clone())
                .or_insert_with(|| ProjectTally {
                    name: commit.k_project.as_ref().map(|project| project.name.clone()),
                    repositories: IndexSet::new(),
                    commits: 0,
                });
            project.commits += 1;
            project.repositories.insert(commit.repository_id.clone());
        }
    }

    tallies
        .into_iter()
        .map(|(email, tally)| {
            let mut stats = tally.stats;
            stats.repo_count = tally.repositories.len();
            stats.project_count = tally.projects.len();
            stats.has_multiple_authors = tally.authors.len() > 1;
            stats.has_multiple_pushers = tally.pushers.len() > 1;
            stats.author_emails = tally.authors.into_iter().collect();
            stats.pusher_emails = tally.pushers.into_iter().collect();
            stats.project_stats = tally
                .projects
                .into_iter()
                .map(|(project_id, project)| CommitterProjectStats {
                    project_id,
                    project_name: project.name,
                    repo_count: project.repositories.len(),
                    commit_count: project.commits,
                })
                .collect();
            (email, stats)
        })
        .collect()
}

/// Commit totals and sorted distinct committers per repository id.
pub fn repository_committers(commits: &[Commit]) -> HashMap<&str, RepositoryCommitters> {
    let mut per_repository: HashMap<&str, (usize, BTreeSet<&str>)> = HashMap::new();
    for commit in commits {
        let Some(email) = commit.committer_email.as_deref().filter(|e| !e.is_empty()) else {
            continue;
        };
        let entry = per_repository.entry(commit.repository_id.as_str()).or_default();
        entry.0 += 1;
        entry.1.insert(email);
    }

    per_repository
        .into_iter()
        .map(|(repository_id, (total_commits, committers))| {
            (
                repository_id,
                RepositoryCommitters {
                    total_commits,
                    count: committers.len(),
                    unique_committers: committers.into_iter().map(str::to_string).collect(),
                },
            )
        })
        .collect()
}

/// Writes `stats.committers` on every repository, zeroed when it had no commits.
pub fn attach_repository_committers(inventory: &mut Inventory, commits: &[Commit]) {
    let per_repository = repository_committers(commits);
    for repository in inventory.resources_mut(ResourceType::Repository) {
        let committers = per_repository
            .get(repository.id.as_str())
            .cloned()
            .unwrap_or_default();
        if let ResourceDetails::Repository { stats, .. } = &mut repository.details {
            stats.get_or_insert_with(RepositoryStats::default).committers = Some(committers);
        }
    }
}
