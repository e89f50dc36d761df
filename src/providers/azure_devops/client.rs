mod core;
mod pagination;

pub use self::core::AzureDevOpsClient;
pub(crate) use self::pagination::items;
