use serde::{Deserialize, Serialize};

use crate::errors::{Result, SyncError};

pub const FILTER_TYPE_GENRE: &str = "genre";

#[derive(Debug, Clone, Deserialize)]
pub struct TagResponse {
    pub data: Vec<TagRecord>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagRecord {
    pub id: String,
    pub attributes: TagAttributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagAttributes {
    pub name: LocalizedName,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocalizedName {
    pub en: String,
}

/// One entry of a filter group, in the key order the filters file uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilterEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub id: String,
    #[serde(rename = "canExclude")]
    pub can_exclude: bool,
}

impl From<&TagRecord> for FilterEntry {
    fn from(tag: &TagRecord) -> Self {
        FilterEntry {
            kind: FILTER_TYPE_GENRE.to_string(),
            name: tag.attributes.name.en.clone(),
            id: tag.id.clone(),
            can_exclude: true,
        }
    }
}

pub fn parse_tag_response(body: &[u8]) -> Result<TagResponse> {
    serde_json::from_slice(body).map_err(|e| SyncError::MalformedUpstream(e.to_string()))
}

pub fn to_filter_entries(response: &TagResponse) -> Vec<FilterEntry> {
    response.data.iter().map(FilterEntry::from).collect()
}
