use crate::context_store::VisionContext;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

pub const PERSONA_KEY: &str = "persona";
pub const VISION_KEY: &str = "vision";
pub const ADMIN_VISION_KEY: &str = "admin_vision";

const DEFAULT_PERSONA: &str = "You are Dave, a friendly moving consultant. Keep replies short and conversational, ask one question at a time, and only mention items you can actually see.";
const DEFAULT_VISION: &str = "Describe the furniture and belongings visible in this room that matter for a move. Mention fragile, heavy or valuable items. Only list what is clearly visible.";
const DEFAULT_ADMIN_VISION: &str = "List every item in this room that needs special handling during a move (fragile, heavy, valuable or electronic), one per line.";

const VISUAL_CONTEXT_HEADER: &str = "\n\n[CURRENT VISUAL CONTEXT]\n";
const NO_REINTRODUCTION: &str =
    "\n\n[IMPORTANT: You already introduced yourself. Do NOT introduce yourself again.]";

/// Reads every `.md` file in `dir_path`, keyed by file stem.
pub fn load_prompts(dir_path: &Path) -> Result<HashMap<String, String>> {
    let mut prompts = HashMap::new();

    for entry in fs::read_dir(dir_path)
        .with_context(|| format!("Failed to read prompts directory: {}", dir_path.display()))?
    {
        let path = entry?.path();
        if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("md") {
            continue;
        }

        let key = path
            .file_stem()
            .and_then(|s| s.to_str())
            .context("Could not get file stem for prompt file")?
            .to_string();
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read prompt file: {}", path.display()))?;

        prompts.insert(key, content.trim().to_string());
    }

    Ok(prompts)
}

/// Prompt texts, with built-in fallbacks for anything the directory lacks.
#[derive(Debug, Clone)]
pub struct Prompts {
    texts: HashMap<String, String>,
}

impl Default for Prompts {
    fn default() -> Self {
        Self::from_map(HashMap::new())
    }
}

impl Prompts {
    pub fn from_map(texts: HashMap<String, String>) -> Self {
        Self { texts }
    }

    /// Loads `dir`; a missing directory falls back to the defaults with a warning.
    pub fn load_or_default(dir: &Path) -> Self {
        match load_prompts(dir) {
            Ok(texts) => {
                tracing::info!(dir = %dir.display(), count = texts.len(), "loaded prompts");
                Self::from_map(texts)
            }
            Err(e) => {
                tracing::warn!(error = %e, "using built-in prompts");
                Self::default()
            }
        }
    }

    fn get_or<'a>(&'a self, key: &str, fallback: &'a str) -> &'a str {
        self.texts
            .get(key)
            .map(String::as_str)
            .filter(|text| !text.is_empty())
            .unwrap_or(fallback)
    }

    pub fn persona(&self) -> &str {
        self.get_or(PERSONA_KEY, DEFAULT_PERSONA)
    }

    pub fn vision(&self) -> &str {
        self.get_or(VISION_KEY, DEFAULT_VISION)
    }

    pub fn admin_vision(&self) -> &str {
        self.get_or(ADMIN_VISION_KEY, DEFAULT_ADMIN_VISION)
    }

    /// System message for a chat turn.
    ///
    /// `vision` must already be filtered for usability. The reintroduction
    /// guard is added whenever the history holds more than the opening message.
    pub fn preamble(&self, vision: Option<&VisionContext>, history_len: usize) -> String {
        let mut preamble = self.persona().to_string();
        if let Some(context) = vision {
            preamble.push_str(VISUAL_CONTEXT_HEADER);
            preamble.push_str(context.text());
        }
        if history_len != 1 {
            preamble.push_str(NO_REINTRODUCTION);
        }
        preamble
    }
}
