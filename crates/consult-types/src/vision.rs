const DATA_URL_PREFIX: &str = "data:";
const DEFAULT_IMAGE_PREFIX: &str = "data:image/jpeg;base64,";

/// A camera frame as sent by clients: either a full data URL or bare base64.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData(String);

impl ImageData {
    /// Returns `None` for absent or blank input.
    pub fn from_raw(raw: Option<&str>) -> Option<Self> {
        let raw = raw?.trim();
        if raw.is_empty() {
            return None;
        }
        // A data URL with nothing after the comma carries no frame.
        if raw.starts_with(DATA_URL_PREFIX) {
            let payload = raw.split_once(',').map(|(_, p)| p.trim()).unwrap_or("");
            if payload.is_empty() {
                return None;
            }
        }
        Some(Self(raw.to_string()))
    }

    /// Data URL suitable for an `image_url` content part.
    pub fn data_url(&self) -> String {
        if self.0.starts_with(DATA_URL_PREFIX) {
            self.0.clone()
        } else {
            format!("{DEFAULT_IMAGE_PREFIX}{}", self.0)
        }
    }

    /// The base64 payload without any data URL header.
    pub fn base64_payload(&self) -> &str {
        if self.0.starts_with(DATA_URL_PREFIX) {
            self.0.split_once(',').map(|(_, p)| p).unwrap_or("")
        } else {
            &self.0
        }
    }
}

/// `POST /api/passive-vision` body.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PassiveVisionRequest {
    #[serde(rename = "imageData")]
    pub image_data: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct PassiveVisionResponse {
    pub analysis: String,
}

/// `POST /api/capture-for-admin` body.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct CaptureForAdminRequest {
    #[serde(rename = "imageData")]
    pub image_data: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CaptureForAdminResponse {
    pub analysis: String,
    pub items: Vec<crate::items::CapturedItem>,
    /// Tells the client to mention the capture to the persona.
    #[serde(rename = "tellDave")]
    pub tell_dave: bool,
}
