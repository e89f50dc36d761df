mod accounts;
mod checks;
mod classify;
mod client;
mod commits;
mod git;
mod inventory;
mod links;
mod merge;
mod permissions;
mod pipelines;
mod projects;
mod reverse_index;
mod scanner;
mod stats;
pub(crate) mod types;

pub use inventory::Inventory;
pub use projects::ProjectTable;
pub use scanner::{AzureDevOpsScanner, ScanParameters, ScanResult};
pub use stats::ProjectStats;
pub use types::{
    Build, BuildServiceAccount, Commit, CommitterStats, PipelineDefinition, ProtectedState,
    Resource, ResourceType,
};
