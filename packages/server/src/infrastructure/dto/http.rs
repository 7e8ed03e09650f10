//! HTTP discovery endpoint DTOs.

use serde::{Deserialize, Serialize};

/// One entry of the `/json/list` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetDescriptorDto {
    pub description: String,
    pub devtools_frontend_url: String,
    pub id: String,
    pub title: String,
    #[serde(rename = "type")]
    pub target_type: String,
    pub url: String,
    pub web_socket_debugger_url: String,
}

/// `/json/version` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDto {
    #[serde(rename = "Browser")]
    pub browser: String,
    #[serde(rename = "Protocol-Version")]
    pub protocol_version: String,
}

impl VersionDto {
    /// Version information of this build.
    pub fn current() -> Self {
        Self {
            browser: format!("debugport/{}", env!("CARGO_PKG_VERSION")),
            protocol_version: "1.1".to_string(),
        }
    }
}
