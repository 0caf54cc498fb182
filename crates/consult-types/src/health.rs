#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub active_sessions: usize,
    /// One decimal place, as a string, matching the admin session listing.
    pub total_minutes_used: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}
