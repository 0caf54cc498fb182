/// Persona sent to the avatar platform when a session token is requested.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersonaConfig {
    name: String,
    avatar_id: String,
    voice_id: String,

    /// The platform-side language model id. `CUSTOMER_CLIENT_V1` hands the
    /// conversation to our own chat relay instead.
    llm_id: String,
    system_prompt: String,
    max_session_length_seconds: u64,
}

impl PersonaConfig {
    pub fn builder() -> PersonaConfigBuilder {
        PersonaConfigBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn avatar_id(&self) -> &str {
        &self.avatar_id
    }

    pub fn voice_id(&self) -> &str {
        &self.voice_id
    }

    pub fn llm_id(&self) -> &str {
        &self.llm_id
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn max_session_length_seconds(&self) -> u64 {
        self.max_session_length_seconds
    }
}

pub struct PersonaConfigBuilder {
    config: PersonaConfig,
}

impl Default for PersonaConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PersonaConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PersonaConfig {
                name: "Dave".to_string(),
                avatar_id: String::new(),
                voice_id: String::new(),
                llm_id: "CUSTOMER_CLIENT_V1".to_string(),
                system_prompt: String::new(),
                max_session_length_seconds: 1800,
            },
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.config.name = name.to_string();
        self
    }

    pub fn with_avatar_id(mut self, avatar_id: &str) -> Self {
        self.config.avatar_id = avatar_id.to_string();
        self
    }

    pub fn with_voice_id(mut self, voice_id: &str) -> Self {
        self.config.voice_id = voice_id.to_string();
        self
    }

    pub fn with_llm_id(mut self, llm_id: &str) -> Self {
        self.config.llm_id = llm_id.to_string();
        self
    }

    pub fn with_system_prompt(mut self, system_prompt: &str) -> Self {
        self.config.system_prompt = system_prompt.to_string();
        self
    }

    pub fn with_max_session_length_seconds(mut self, seconds: u64) -> Self {
        self.config.max_session_length_seconds = seconds;
        self
    }

    pub fn build(self) -> PersonaConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_platform_field_names() {
        let persona = PersonaConfig::builder()
            .with_avatar_id("avatar-1")
            .with_voice_id("voice-1")
            .with_system_prompt("You are Dave.")
            .build();
        let json = serde_json::to_value(&persona).unwrap();
        assert_eq!(json["avatarId"], "avatar-1");
        assert_eq!(json["voiceId"], "voice-1");
        assert_eq!(json["llmId"], "CUSTOMER_CLIENT_V1");
        assert_eq!(json["maxSessionLengthSeconds"], 1800);
    }
}
