// Defensive parsing of google_search tool output into source-url parts.
// The gateway's search runtime is loosely typed; anything that is not an
// object with an absolute http(s) URL is dropped.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchSource {
    pub source_id: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Extract the valid sources from a google_search output. The fallback id
/// keeps the entry's position in the original `sources` array, so filtered
/// neighbors do not shift the numbering.
pub fn parse_google_search_sources(output: &Value) -> Vec<SearchSource> {
    let entries = match output.get("sources").and_then(Value::as_array) {
        Some(entries) => entries,
        None => return Vec::new(),
    };

    entries
        .iter()
        .enumerate()
        .filter_map(|(index, entry)| {
            let obj = entry.as_object()?;
            let url = obj.get("url")?.as_str()?;
            if !is_http_url(url) {
                return None;
            }
            let source_id = obj
                .get("id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("google-search-{}", index));
            let title = obj
                .get("title")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(str::to_string);
            Some(SearchSource {
                source_id,
                url: url.to_string(),
                title,
            })
        })
        .collect()
}

pub fn is_http_url(candidate: &str) -> bool {
    match Url::parse(candidate) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.has_host(),
        Err(_) => false,
    }
}
