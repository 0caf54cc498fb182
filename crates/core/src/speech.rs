use crate::error::{ConsultError, RecognitionError, Result};
use crate::openai::Transcriber;
use crate::turn::{CaptureControl, MIN_TRANSCRIPT_CHARS};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub const RESTART_DELAY: Duration = Duration::from_millis(300);
pub const RESTART_RETRY_DELAY: Duration = Duration::from_millis(1500);
pub const RESTART_MAX_DELAY: Duration = Duration::from_secs(30);
pub const MIN_CONFIDENCE: f32 = 0.5;
pub const FALLBACK_AFTER_FAILURES: u32 = 3;

#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEvent {
    Result {
        transcript: String,
        is_final: bool,
        /// Not every recognizer reports one.
        confidence: Option<f32>,
    },
    Error(RecognitionError),
    /// The recognizer stopped on its own.
    End,
}

impl SpeechEvent {
    pub fn final_result(transcript: &str) -> Self {
        SpeechEvent::Result {
            transcript: transcript.to_string(),
            is_final: true,
            confidence: None,
        }
    }
}

/// A speech recognition strategy. Each `start` hands out a fresh event stream.
#[async_trait]
pub trait SpeechSource: Send {
    fn name(&self) -> &'static str;

    async fn start(&mut self) -> Result<mpsc::Receiver<SpeechEvent>>;

    async fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Listening,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub struct TranscriptFilter {
    pub min_chars: usize,
    pub min_confidence: f32,
}

impl Default for TranscriptFilter {
    fn default() -> Self {
        Self {
            min_chars: MIN_TRANSCRIPT_CHARS,
            min_confidence: MIN_CONFIDENCE,
        }
    }
}

impl TranscriptFilter {
    /// The trimmed transcript if it is final, long enough and confident enough.
    pub fn accept(&self, transcript: &str, is_final: bool, confidence: Option<f32>) -> Option<String> {
        let transcript = transcript.trim();
        if !is_final || transcript.chars().count() < self.min_chars {
            return None;
        }
        if confidence.is_some_and(|c| c < self.min_confidence) {
            return None;
        }
        Some(transcript.to_string())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    pub first_delay: Duration,
    pub second_delay: Duration,
    /// Ceiling for the doubling delay once both quick retries have failed.
    pub max_delay: Duration,
    /// Consecutive failures before switching to the fallback strategy.
    pub fallback_after: u32,
}

impl RestartPolicy {
    /// Delay before backoff attempt `attempt`, counting from 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.second_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            first_delay: RESTART_DELAY,
            second_delay: RESTART_RETRY_DELAY,
            max_delay: RESTART_MAX_DELAY,
            fallback_after: FALLBACK_AFTER_FAILURES,
        }
    }
}

enum CaptureCommand {
    Pause(oneshot::Sender<Result<()>>),
    Resume(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<()>),
}

/// Control side of a running [`SpeechCapture`].
#[derive(Clone)]
pub struct CaptureHandle {
    commands: mpsc::Sender<CaptureCommand>,
    state: watch::Receiver<CaptureState>,
}

impl CaptureHandle {
    pub fn state(&self) -> CaptureState {
        *self.state.borrow()
    }

    pub async fn wait_for(&self, target: CaptureState) -> CaptureState {
        let mut state = self.state.clone();
        match state.wait_for(|s| *s == target).await {
            Ok(s) => *s,
            Err(_) => CaptureState::Stopped,
        }
    }

    async fn request(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<()>>) -> CaptureCommand,
    ) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.commands
            .send(command(ack))
            .await
            .map_err(|_| ConsultError::validation("speech capture has stopped"))?;
        done.await
            .map_err(|_| ConsultError::validation("speech capture has stopped"))?
    }

    pub async fn stop(&self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(CaptureCommand::Stop(ack)).await.is_ok() {
            let _ = done.await;
        }
    }
}

#[async_trait]
impl CaptureControl for CaptureHandle {
    async fn pause(&self) -> Result<()> {
        self.request(CaptureCommand::Pause).await
    }

    async fn resume(&self) -> Result<()> {
        self.request(CaptureCommand::Resume).await
    }
}

/// Supervises a speech source: filters transcripts, restarts the recognizer
/// whenever it ends, and falls back to a second strategy when it keeps failing.
pub struct SpeechCapture {
    primary: Box<dyn SpeechSource>,
    fallback: Option<Box<dyn SpeechSource>>,
    filter: TranscriptFilter,
    policy: RestartPolicy,
}

impl SpeechCapture {
    pub fn new(primary: Box<dyn SpeechSource>) -> Self {
        Self {
            primary,
            fallback: None,
            filter: TranscriptFilter::default(),
            policy: RestartPolicy::default(),
        }
    }

    pub fn with_fallback(mut self, fallback: Box<dyn SpeechSource>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn with_filter(mut self, filter: TranscriptFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_policy(mut self, policy: RestartPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Starts listening; accepted transcripts are sent to `transcripts`.
    pub fn spawn(self, transcripts: mpsc::Sender<String>) -> CaptureHandle {
        let (commands, rx) = mpsc::channel(16);
        let (state_tx, state) = watch::channel(CaptureState::Idle);

        let supervisor = Supervisor {
            source: self.primary,
            fallback: self.fallback,
            filter: self.filter,
            policy: self.policy,
            events: None,
            restart: Some((Instant::now(), RestartStage::First)),
            failures: 0,
            state: state_tx,
            transcripts,
        };
        tokio::spawn(supervisor.run(rx));

        CaptureHandle { commands, state }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RestartStage {
    First,
    Second,
    Backoff(u32),
}

struct Supervisor {
    source: Box<dyn SpeechSource>,
    fallback: Option<Box<dyn SpeechSource>>,
    filter: TranscriptFilter,
    policy: RestartPolicy,
    events: Option<mpsc::Receiver<SpeechEvent>>,
    restart: Option<(Instant, RestartStage)>,
    failures: u32,
    state: watch::Sender<CaptureState>,
    transcripts: mpsc::Sender<String>,
}

async fn next_event(events: &mut Option<mpsc::Receiver<SpeechEvent>>) -> Option<SpeechEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn restart_due(restart: Option<(Instant, RestartStage)>) -> RestartStage {
    match restart {
        Some((at, stage)) => {
            tokio::time::sleep_until(at).await;
            stage
        }
        None => std::future::pending().await,
    }
}

impl Supervisor {
    async fn run(mut self, mut commands: mpsc::Receiver<CaptureCommand>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(CaptureCommand::Pause(ack)) => {
                        self.pause().await;
                        let _ = ack.send(Ok(()));
                    }
                    Some(CaptureCommand::Resume(ack)) => {
                        let result = self.resume().await;
                        let _ = ack.send(result);
                    }
                    Some(CaptureCommand::Stop(ack)) => {
                        self.stop().await;
                        let _ = ack.send(());
                        break;
                    }
                    None => {
                        self.stop().await;
                        break;
                    }
                },
                event = next_event(&mut self.events) => self.handle_event(event).await,
                stage = restart_due(self.restart) => self.attempt_start(stage).await,
            }
        }
        tracing::debug!("speech capture supervisor exited");
    }

    fn current(&self) -> CaptureState {
        *self.state.borrow()
    }

    fn set_state(&self, next: CaptureState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            tracing::debug!(source = self.source.name(), ?previous, ?next, "capture state");
        }
    }

    async fn start_source(&mut self) -> Result<()> {
        let events = self.source.start().await?;
        self.events = Some(events);
        self.restart = None;
        self.set_state(CaptureState::Listening);
        tracing::info!(source = self.source.name(), "listening");
        Ok(())
    }

    async fn pause(&mut self) {
        match self.current() {
            CaptureState::Listening => {
                self.events = None;
                self.source.stop().await;
                self.set_state(CaptureState::Paused);
            }
            CaptureState::Idle => {
                self.restart = None;
                self.set_state(CaptureState::Paused);
            }
            CaptureState::Paused | CaptureState::Stopped => {}
        }
    }

    async fn resume(&mut self) -> Result<()> {
        match self.current() {
            CaptureState::Listening => Ok(()),
            CaptureState::Stopped => Err(ConsultError::validation("speech capture has stopped")),
            CaptureState::Paused | CaptureState::Idle => match self.start_source().await {
                Ok(()) => Ok(()),
                Err(ConsultError::Media(e)) => Err(self.give_up_on_media(e)),
                Err(e) => {
                    self.set_state(CaptureState::Idle);
                    Err(e)
                }
            },
        }
    }

    async fn stop(&mut self) {
        self.events = None;
        self.restart = None;
        self.source.stop().await;
        self.set_state(CaptureState::Stopped);
    }

    fn give_up_on_media(&mut self, error: crate::error::MediaError) -> ConsultError {
        tracing::error!(error = %error, guidance = error.guidance(), "microphone unavailable");
        self.events = None;
        self.restart = None;
        self.set_state(CaptureState::Stopped);
        ConsultError::Media(error)
    }

    async fn handle_event(&mut self, event: Option<SpeechEvent>) {
        match event {
            Some(SpeechEvent::Result {
                transcript,
                is_final,
                confidence,
            }) => {
                let Some(text) = self.filter.accept(&transcript, is_final, confidence) else {
                    return;
                };
                self.failures = 0;
                tracing::info!(transcript = %text, "transcript");
                if self.transcripts.send(text).await.is_err() {
                    tracing::warn!("transcript receiver dropped");
                }
            }
            Some(SpeechEvent::Error(error)) => {
                if error.is_benign() {
                    tracing::debug!(error = %error, "recognition interrupted");
                } else {
                    self.failures += 1;
                    tracing::warn!(error = %error, failures = self.failures, "recognition error");
                }
                self.schedule_restart();
            }
            Some(SpeechEvent::End) | None => self.schedule_restart(),
        }
    }

    /// Terminal event while listening: come back after the short delay.
    fn schedule_restart(&mut self) {
        self.events = None;
        if self.current() != CaptureState::Listening {
            return;
        }
        if self.failures >= self.policy.fallback_after {
            self.switch_to_fallback();
        }
        self.set_state(CaptureState::Idle);
        self.restart = Some((Instant::now() + self.policy.first_delay, RestartStage::First));
    }

    fn switch_to_fallback(&mut self) -> bool {
        let Some(fallback) = self.fallback.take() else {
            return false;
        };
        tracing::warn!(
            from = self.source.name(),
            to = fallback.name(),
            "switching speech capture strategy"
        );
        self.source = fallback;
        self.failures = 0;
        true
    }

    async fn attempt_start(&mut self, stage: RestartStage) {
        self.restart = None;
        let error = match self.start_source().await {
            Ok(()) => return,
            Err(ConsultError::Media(e)) => {
                self.give_up_on_media(e);
                return;
            }
            Err(e) => e,
        };

        self.failures += 1;
        tracing::warn!(source = self.source.name(), error = %error, ?stage, "failed to start recognition");
        match stage {
            RestartStage::First => {
                self.restart = Some((Instant::now() + self.policy.second_delay, RestartStage::Second));
            }
            RestartStage::Second if self.switch_to_fallback() => {
                self.restart = Some((Instant::now() + self.policy.first_delay, RestartStage::First));
            }
            RestartStage::Second => self.back_off(1),
            RestartStage::Backoff(attempt) => self.back_off(attempt.saturating_add(1)),
        }
    }

    /// Schedules the next retry at a growing interval. Only a stop or a media error ends the retries.
    fn back_off(&mut self, attempt: u32) {
        let delay = self.policy.backoff(attempt);
        tracing::error!(
            source = self.source.name(),
            attempt,
            retry_in_ms = delay.as_millis() as u64,
            "recognition did not restart"
        );
        self.set_state(CaptureState::Idle);
        self.restart = Some((Instant::now() + delay, RestartStage::Backoff(attempt)));
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub bytes: Vec<u8>,
    pub file_name: String,
}

/// Produces recorded audio chunks for the transcription fallback.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AudioRecorder: Send + 'static {
    /// Waits for the next chunk; `None` once recording has finished.
    async fn next_chunk(&mut self) -> Result<Option<AudioChunk>>;
}

/// Fallback strategy: record chunks and send each to a transcription service.
pub struct RecordedTranscription<R: AudioRecorder> {
    recorder: Arc<Mutex<R>>,
    transcriber: Arc<dyn Transcriber>,
    task: Option<JoinHandle<()>>,
}

impl<R: AudioRecorder> RecordedTranscription<R> {
    pub fn new(recorder: R, transcriber: Arc<dyn Transcriber>) -> Self {
        Self {
            recorder: Arc::new(Mutex::new(recorder)),
            transcriber,
            task: None,
        }
    }
}

#[async_trait]
impl<R: AudioRecorder> SpeechSource for RecordedTranscription<R> {
    fn name(&self) -> &'static str {
        "recorded-transcription"
    }

    async fn start(&mut self) -> Result<mpsc::Receiver<SpeechEvent>> {
        self.stop().await;
        let (tx, rx) = mpsc::channel(16);
        let recorder = Arc::clone(&self.recorder);
        let transcriber = Arc::clone(&self.transcriber);

        self.task = Some(tokio::spawn(async move {
            loop {
                let chunk = recorder.lock().await.next_chunk().await;
                let event = match chunk {
                    Ok(Some(chunk)) => match transcriber.transcribe(chunk.bytes, &chunk.file_name).await {
                        Ok(text) if text.trim().is_empty() => continue,
                        Ok(text) => SpeechEvent::final_result(&text),
                        Err(e) => SpeechEvent::Error(RecognitionError::Network(e.to_string())),
                    },
                    Ok(None) => SpeechEvent::End,
                    Err(e) => SpeechEvent::Error(RecognitionError::Other(e.to_string())),
                };
                let terminal = !matches!(event, SpeechEvent::Result { .. });
                if tx.send(event).await.is_err() || terminal {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MediaError;
    use crate::openai::MockTranscriber;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A recognizer whose event streams are driven by the test.
    #[derive(Clone, Default)]
    struct ScriptedSource {
        senders: Arc<StdMutex<Vec<mpsc::Sender<SpeechEvent>>>>,
        starts: Arc<AtomicUsize>,
        stops: Arc<AtomicUsize>,
        failing_starts: Arc<AtomicUsize>,
        media_error: bool,
    }

    impl ScriptedSource {
        fn failing(times: usize) -> Self {
            let source = Self::default();
            source.failing_starts.store(times, Ordering::SeqCst);
            source
        }

        fn starts(&self) -> usize {
            self.starts.load(Ordering::SeqCst)
        }

        fn stops(&self) -> usize {
            self.stops.load(Ordering::SeqCst)
        }

        async fn emit(&self, event: SpeechEvent) {
            let tx = self.senders.lock().unwrap().last().cloned().unwrap();
            tx.send(event).await.unwrap();
        }
    }

    #[async_trait]
    impl SpeechSource for ScriptedSource {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn start(&mut self) -> Result<mpsc::Receiver<SpeechEvent>> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            if self.media_error {
                return Err(MediaError::PermissionDenied("microphone".into()).into());
            }
            if self.failing_starts.load(Ordering::SeqCst) > 0 {
                self.failing_starts.fetch_sub(1, Ordering::SeqCst);
                return Err(ConsultError::validation("recognizer unavailable"));
            }
            let (tx, rx) = mpsc::channel(16);
            self.senders.lock().unwrap().push(tx);
            Ok(rx)
        }

        async fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn result(transcript: &str, is_final: bool, confidence: Option<f32>) -> SpeechEvent {
        SpeechEvent::Result {
            transcript: transcript.into(),
            is_final,
            confidence,
        }
    }

    #[test]
    fn filter_drops_noise_and_interim_results() {
        let filter = TranscriptFilter::default();
        assert_eq!(filter.accept("a", true, None), None);
        assert_eq!(filter.accept("hello", false, Some(0.9)), None);
        assert_eq!(filter.accept("hello", true, Some(0.2)), None);
        assert_eq!(filter.accept(" hello ", true, Some(0.9)), Some("hello".into()));
        assert_eq!(filter.accept("ok", true, None), Some("ok".into()));
    }

    #[tokio::test]
    async fn only_accepted_transcripts_are_forwarded() {
        let source = ScriptedSource::default();
        let (tx, mut transcripts) = mpsc::channel(8);
        let handle = SpeechCapture::new(Box::new(source.clone())).spawn(tx);
        handle.wait_for(CaptureState::Listening).await;

        source.emit(result("a", true, None)).await;
        source.emit(result("hello there", false, None)).await;
        source.emit(result("hello there", true, Some(0.1))).await;
        source.emit(result("I have a piano", true, Some(0.9))).await;

        assert_eq!(transcripts.recv().await.as_deref(), Some("I have a piano"));
        assert!(transcripts.try_recv().is_err());
        handle.stop().await;
    }

    #[tokio::test]
    async fn pause_stops_the_source_and_resume_restarts_it() {
        let source = ScriptedSource::default();
        let (tx, _transcripts) = mpsc::channel(8);
        let handle = SpeechCapture::new(Box::new(source.clone())).spawn(tx);
        handle.wait_for(CaptureState::Listening).await;

        handle.pause().await.unwrap();
        assert_eq!(handle.state(), CaptureState::Paused);
        assert_eq!(source.stops(), 1);

        handle.resume().await.unwrap();
        assert_eq!(handle.state(), CaptureState::Listening);
        assert_eq!(source.starts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn end_event_restarts_after_short_delay() {
        let source = ScriptedSource::default();
        let (tx, _transcripts) = mpsc::channel(8);
        let handle = SpeechCapture::new(Box::new(source.clone())).spawn(tx);
        handle.wait_for(CaptureState::Listening).await;

        source.emit(SpeechEvent::End).await;
        tokio::time::sleep(RESTART_DELAY - Duration::from_millis(10)).await;
        assert_eq!(source.starts(), 1);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(source.starts(), 2);
        assert_eq!(handle.state(), CaptureState::Listening);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_restart_is_retried_after_longer_delay() {
        let source = ScriptedSource::failing(1);
        let (tx, _transcripts) = mpsc::channel(8);
        let handle = SpeechCapture::new(Box::new(source.clone())).spawn(tx);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.starts(), 1);
        assert_eq!(handle.state(), CaptureState::Idle);

        tokio::time::sleep(RESTART_RETRY_DELAY).await;
        assert_eq!(source.starts(), 2);
        assert_eq!(handle.state(), CaptureState::Listening);
    }

    #[tokio::test(start_paused = true)]
    async fn restarts_keep_backing_off_until_the_source_recovers() {
        let source = ScriptedSource::failing(3);
        let (tx, _transcripts) = mpsc::channel(8);
        let handle = SpeechCapture::new(Box::new(source.clone())).spawn(tx);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.starts(), 1);
        tokio::time::sleep(RESTART_RETRY_DELAY).await;
        assert_eq!(source.starts(), 2);
        assert_eq!(handle.state(), CaptureState::Idle);

        tokio::time::sleep(RESTART_RETRY_DELAY * 2).await;
        assert_eq!(source.starts(), 3);
        assert_eq!(handle.state(), CaptureState::Idle);

        tokio::time::sleep(RESTART_RETRY_DELAY * 4).await;
        assert_eq!(source.starts(), 4);
        assert_eq!(handle.state(), CaptureState::Listening);
        handle.stop().await;
    }

    #[test]
    fn backoff_doubles_up_to_the_ceiling() {
        let policy = RestartPolicy::default();
        assert_eq!(policy.backoff(1), RESTART_RETRY_DELAY * 2);
        assert_eq!(policy.backoff(2), RESTART_RETRY_DELAY * 4);
        assert_eq!(policy.backoff(5), RESTART_MAX_DELAY);
        assert_eq!(policy.backoff(u32::MAX), RESTART_MAX_DELAY);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_failure_switches_to_fallback() {
        let primary = ScriptedSource::failing(usize::MAX);
        let fallback = ScriptedSource::default();
        let (tx, _transcripts) = mpsc::channel(8);
        let handle = SpeechCapture::new(Box::new(primary.clone()))
            .with_fallback(Box::new(fallback.clone()))
            .spawn(tx);

        handle.wait_for(CaptureState::Listening).await;
        assert_eq!(primary.starts(), 2);
        assert_eq!(fallback.starts(), 1);
    }

    #[tokio::test]
    async fn media_errors_are_not_retried() {
        let source = ScriptedSource {
            media_error: true,
            ..ScriptedSource::default()
        };
        let (tx, _transcripts) = mpsc::channel(8);
        let handle = SpeechCapture::new(Box::new(source.clone())).spawn(tx);

        handle.wait_for(CaptureState::Stopped).await;
        assert_eq!(source.starts(), 1);
        assert!(handle.resume().await.is_err());
    }

    #[tokio::test]
    async fn recorded_chunks_become_final_transcripts() {
        let mut recorder = MockAudioRecorder::new();
        let mut chunks = vec![
            AudioChunk {
                bytes: vec![1],
                file_name: "a.webm".into(),
            },
            AudioChunk {
                bytes: vec![2],
                file_name: "b.webm".into(),
            },
        ]
        .into_iter();
        recorder
            .expect_next_chunk()
            .returning(move || Ok(chunks.next()));

        let mut transcriber = MockTranscriber::new();
        transcriber
            .expect_transcribe()
            .returning(|bytes, _| Ok(if bytes == vec![1] { "one two".into() } else { "three".into() }));

        let mut source = RecordedTranscription::new(recorder, Arc::new(transcriber));
        let mut events = source.start().await.unwrap();

        assert_eq!(events.recv().await, Some(SpeechEvent::final_result("one two")));
        assert_eq!(events.recv().await, Some(SpeechEvent::final_result("three")));
        assert_eq!(events.recv().await, Some(SpeechEvent::End));
    }
}
