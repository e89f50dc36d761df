use log::debug;
use reqwest::header::HeaderMap;
use serde_json::Value;
use url::Url;

use super::core::AzureDevOpsClient;
use crate::error::Result;

const CONTINUATION_HEADER: &str = "x-ms-continuationtoken";
const CONTINUATION_PARAM: &str = "continuationToken";

impl AzureDevOpsClient {
    /// Fetches every page of a listing that paginates with continuation tokens.
    ///
    /// The next page is requested for as long as the response carries an
    /// `x-ms-continuationtoken` header.
    pub async fn fetch_all(&self, url: &Url) -> Result<Vec<Value>> {
        let mut all_items = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut page_url = url.clone();
            if let Some(token) = &continuation {
                page_url
                    .query_pairs_mut()
                    .append_pair(CONTINUATION_PARAM, token);
            }

            let (value, headers) = self.fetch_with_headers(&page_url).await?;
            all_items.extend(items(value));

            continuation = continuation_token(&headers);
            match &continuation {
                Some(token) => debug!("Following continuation token {token} for {url}"),
                None => break,
            }
        }

        Ok(all_items)
    }

    /// Fetches every page of a listing that only supports `$top`/`$skip`.
    ///
    /// Stops at the first empty or short page.
    pub async fn fetch_paged(&self, url: &Url, page_size: usize) -> Result<Vec<Value>> {
        let page_size = page_size.max(1);
        let mut all_items = Vec::new();
        let mut skip = 0usize;

        loop {
            let mut page_url = url.clone();
            page_url
                .query_pairs_mut()
                .append_pair("$top", &page_size.to_string())
                .append_pair("$skip", &skip.to_string());

            let page = items(self.fetch(&page_url).await?);
            let fetched = page.len();
            all_items.extend(page);

            if fetched < page_size {
                break;
            }
            skip += page_size;
        }

        Ok(all_items)
    }
}

/// Listing payload as a list of records. `null` is an empty listing.
pub(crate) fn items(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        other => vec![other],
    }
}

fn continuation_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(CONTINUATION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}
