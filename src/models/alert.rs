use chrono::{DateTime, Utc};
use serde::Serialize;

/// Alert payload handed to the persistence layer. The screenshot is an
/// optional base64 JPEG; a `data:image/...;base64,` prefix is tolerated and
/// stripped before storage.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub session_id: String,
    pub user_id: i64,
    pub alert_type: String,
    pub description: String,
    pub screenshot: Option<String>,
    pub severity: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub id: i64,
    pub session_id: String,
    pub user_id: i64,
    pub alert_type: String,
    pub description: String,
    pub severity: i64,
    pub created_at: DateTime<Utc>,
}
