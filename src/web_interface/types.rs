use serde::{Deserialize, Deserializer, Serialize};

/// Body of `POST /api/dashboard/create`. Every field is optional.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
pub struct CreateRequest {
    /// External owner reference, e.g. a chat user id (string or number).
    #[serde(default, alias = "owner", deserialize_with = "owner_from_json")]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateResponse {
    pub session_id: String,
    pub url: String,
    pub link: String,
    pub expires_at: String,
    pub timeout_minutes: u64,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub url: String,
    pub created_at: String,
    pub expires_at: String,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub url: String,
    pub created_at: String,
    pub expires_at: String,
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub active_sessions: usize,
    pub max_sessions: usize,
    pub total_created: u64,
    pub failed_launches: u64,
    pub reaped: u64,
    pub sessions: Vec<SessionSummary>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_sessions: usize,
    pub provisioning_sessions: usize,
    pub max_sessions: usize,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// API error payload
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
}

fn owner_from_json<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
