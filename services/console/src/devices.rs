use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use consult_core::error::MediaError;
use consult_core::speech::{AudioChunk, AudioRecorder, SpeechEvent, SpeechSource};
use consult_core::turn::AvatarSpeaker;
use consult_core::vision::FrameSource;
use consult_core::{ConsultError, Result};
use consult_types::ImageData;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;

const AUDIO_EXTENSIONS: &[&str] = &["wav", "webm", "mp3", "m4a", "ogg"];
pub const AUDIO_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Treats each typed line as a final recognition result.
///
/// Lines typed while capture is paused are dropped on the next start, the
/// same way a microphone misses speech while muted.
pub struct LineRecognizer {
    lines: Arc<Mutex<mpsc::Receiver<String>>>,
    task: Option<JoinHandle<()>>,
}

impl LineRecognizer {
    pub fn new(lines: mpsc::Receiver<String>) -> Self {
        Self {
            lines: Arc::new(Mutex::new(lines)),
            task: None,
        }
    }
}

#[async_trait]
impl SpeechSource for LineRecognizer {
    fn name(&self) -> &'static str {
        "terminal"
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<SpeechEvent>> {
        self.stop().await;
        let mut dropped = 0;
        {
            let mut lines = self.lines.lock().await;
            while lines.try_recv().is_ok() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            tracing::debug!(dropped, "discarded input typed while paused");
        }

        let (tx, rx) = mpsc::channel(16);
        let lines = Arc::clone(&self.lines);
        self.task = Some(tokio::spawn(async move {
            loop {
                let line = lines.lock().await.recv().await;
                let event = match line {
                    Some(line) => SpeechEvent::final_result(&line),
                    None => SpeechEvent::End,
                };
                let ended = event == SpeechEvent::End;
                if tx.send(event).await.is_err() || ended {
                    return;
                }
            }
        }));
        Ok(rx)
    }

    async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Picks up audio files dropped into a directory, oldest name first.
pub struct DirectoryRecorder {
    dir: PathBuf,
    seen: HashSet<PathBuf>,
    poll: Duration,
}

impl DirectoryRecorder {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            seen: HashSet::new(),
            poll: AUDIO_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    async fn pending(&self) -> Result<Vec<PathBuf>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MediaError::NotFound(self.dir.display().to_string()),
            std::io::ErrorKind::PermissionDenied => {
                MediaError::PermissionDenied(self.dir.display().to_string())
            }
            _ => MediaError::DeviceBusy(e.to_string()),
        })?;

        let mut found = Vec::new();
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            let is_audio = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext.to_lowercase().as_str()));
            if is_audio && !self.seen.contains(&path) {
                found.push(path);
            }
        }
        found.sort();
        Ok(found)
    }
}

#[async_trait]
impl AudioRecorder for DirectoryRecorder {
    async fn next_chunk(&mut self) -> Result<Option<AudioChunk>> {
        loop {
            if let Some(path) = self.pending().await?.into_iter().next() {
                self.seen.insert(path.clone());
                let bytes = tokio::fs::read(&path)
                    .await
                    .map_err(|e| MediaError::DeviceBusy(e.to_string()))?;
                let file_name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "audio.webm".to_string());
                tracing::debug!(file = %file_name, bytes = bytes.len(), "audio chunk ready");
                return Ok(Some(AudioChunk { bytes, file_name }));
            }
            tokio::time::sleep(self.poll).await;
        }
    }
}

/// Reads the current camera frame from an image file that something else keeps updating.
pub struct ImageFileSource {
    path: PathBuf,
}

impl ImageFileSource {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    fn mime(&self) -> &'static str {
        match self
            .path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .as_deref()
        {
            Some("png") => "image/png",
            Some("webp") => "image/webp",
            _ => "image/jpeg",
        }
    }
}

#[async_trait]
impl FrameSource for ImageFileSource {
    async fn capture_frame(&self) -> Option<ImageData> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => return None,
            Err(e) => {
                tracing::debug!(path = %self.path.display(), error = %e, "no frame available");
                return None;
            }
        };
        let data_url = format!("data:{};base64,{}", self.mime(), STANDARD.encode(bytes));
        ImageData::from_raw(Some(&data_url))
    }
}

/// Prints the avatar's words as they arrive.
#[derive(Default)]
pub struct TerminalSpeaker;

#[async_trait]
impl AvatarSpeaker for TerminalSpeaker {
    async fn speak_chunk(&self, text: &str) -> Result<()> {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(text.as_bytes())
            .await
            .map_err(|e| ConsultError::Media(MediaError::DeviceBusy(e.to_string())))?;
        stdout
            .flush()
            .await
            .map_err(|e| ConsultError::Media(MediaError::DeviceBusy(e.to_string())))
    }

    async fn finish(&self) -> Result<()> {
        self.speak_chunk("\n").await
    }
}
