pub const AVATAR_API_KEY: &str = "AVATAR_API_KEY";
pub const AVATAR_API_BASE_URL: &str = "AVATAR_API_BASE_URL";

pub const BASE_URL: &str = "https://api.anam.ai/v1";

pub const SESSION_TOKEN_PATH: &str = "/auth/session-token";
pub const STOP_SESSION_PATH: &str = "/sessions/stop";
