pub mod azure_devops;

pub use azure_devops::{AzureDevOpsScanner, ScanParameters};
