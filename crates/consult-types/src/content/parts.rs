#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text(TextPart),
    #[serde(rename = "image_url")]
    ImageUrl(ImageUrlPart),
}

impl ContentPart {
    pub fn text(text: &str) -> Self {
        ContentPart::Text(TextPart {
            text: text.to_string(),
        })
    }

    pub fn image_url(url: &str) -> Self {
        ContentPart::ImageUrl(ImageUrlPart {
            image_url: ImageUrl {
                url: url.to_string(),
                detail: None,
            },
        })
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct TextPart {
    text: String,
}

impl TextPart {
    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ImageUrlPart {
    image_url: ImageUrl,
}

impl ImageUrlPart {
    pub fn image_url(&self) -> &ImageUrl {
        &self.image_url
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct ImageUrl {
    url: String,

    /// "low", "high" or "auto". Left out of the payload when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
}

impl ImageUrl {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }
}
