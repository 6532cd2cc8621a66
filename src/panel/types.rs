use serde::{Deserialize, Serialize};

/// Resolved connection to one panel: host, an authenticated session cookie
/// and the optional public base URL its subscription links are served from.
#[derive(Debug, Clone)]
pub struct PanelTarget {
    pub server_id: i32,
    pub remark: String,
    pub host: String,
    pub session: String,
    pub sub_host: Option<String>,
}

/// Per-client state as reported by the panel's inbound listing. `sub_id`
/// carries the subscription's identity token; `all_time` is the cumulative
/// byte counter the usage aggregator consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientStats {
    pub id: i64,
    #[serde(rename = "inboundId", default)]
    pub inbound_id: i64,
    pub email: String,
    pub enable: bool,
    #[serde(rename = "expiryTime", default)]
    pub expiry_time: i64,
    #[serde(default)]
    pub up: i64,
    #[serde(default)]
    pub down: i64,
    #[serde(default)]
    pub total: i64,
    #[serde(rename = "allTime", default)]
    pub all_time: i64,
    #[serde(default)]
    pub reset: i64,
    #[serde(rename = "subId", default)]
    pub sub_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Inbound {
    pub id: i64,
    pub remark: String,
    pub enable: bool,
    pub protocol: String,
    #[serde(rename = "clientStats", default)]
    pub client_stats: Vec<ClientStats>,
}

impl Inbound {
    pub fn find_client(&self, key: &str) -> Option<&ClientStats> {
        self.client_stats.iter().find(|c| c.sub_id == key)
    }
}

/// Response envelope every panel API call is wrapped in.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default)]
    pub msg: String,
    pub obj: Option<T>,
}

/// The panel keys clients by a per-inbound identifier: the inbound id
/// spliced over the head of the subscription's identity token. The token is
/// ASCII (uuid), so byte indexing is safe; a token shorter than the prefix
/// degenerates to the prefix alone.
pub fn client_identifier(inbound_id: i64, key: &str) -> String {
    let prefix = inbound_id.to_string();
    match key.get(prefix.len()..) {
        Some(rest) => format!("{prefix}{rest}"),
        None => prefix,
    }
}
