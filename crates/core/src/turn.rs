use crate::error::{ConsultError, Result};
use crate::relay::ChatBackend;
use async_trait::async_trait;
use consult_types::ChatMessage;
#[cfg(test)]
use mockall::automock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

pub const WORDS_PER_MINUTE: f64 = 150.0;
pub const PROCESSING_BUFFER: Duration = Duration::from_millis(1500);
pub const CLEARING_BUFFER: Duration = Duration::from_millis(1000);
pub const RESUME_RETRY_DELAY: Duration = Duration::from_secs(2);
pub const MIN_TRANSCRIPT_CHARS: usize = 2;

/// Where the avatar's voice comes from.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait AvatarSpeaker: Send + Sync {
    async fn speak_chunk(&self, text: &str) -> Result<()>;

    /// Called once the whole reply has been handed over.
    async fn finish(&self) -> Result<()>;
}

/// Lets the turn controller silence the microphone while the avatar talks.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CaptureControl: Send + Sync {
    async fn pause(&self) -> Result<()>;

    async fn resume(&self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Generating,
    Speaking,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnEvent {
    Started { transcript: String },
    Token(String),
    Completed { reply: String, settle: Duration },
    Failed(String),
    CaptureResumed,
    CaptureResumeFailed,
}

#[derive(Debug, Clone, Copy)]
pub struct TurnTiming {
    pub words_per_minute: f64,
    pub processing_buffer: Duration,
    pub clearing_buffer: Duration,
    pub resume_retry_delay: Duration,
}

impl Default for TurnTiming {
    fn default() -> Self {
        Self {
            words_per_minute: WORDS_PER_MINUTE,
            processing_buffer: PROCESSING_BUFFER,
            clearing_buffer: CLEARING_BUFFER,
            resume_retry_delay: RESUME_RETRY_DELAY,
        }
    }
}

impl TurnTiming {
    pub fn speaking_time(&self, reply: &str) -> Duration {
        let words = reply.split_whitespace().count() as f64;
        Duration::from_secs_f64(words * 60.0 / self.words_per_minute)
    }

    /// How long capture stays paused after a reply finished streaming.
    pub fn settle_time(&self, reply: &str) -> Duration {
        self.speaking_time(reply) + self.processing_buffer + self.clearing_buffer
    }
}

struct Conversation {
    history: Vec<ChatMessage>,
    phase: TurnPhase,
}

/// Runs one conversation: strictly one turn at a time, with capture paused
/// from the start of generation until the avatar has settled.
pub struct TurnController {
    backend: Arc<dyn ChatBackend>,
    speaker: Arc<dyn AvatarSpeaker>,
    capture: Arc<dyn CaptureControl>,
    timing: TurnTiming,
    session_id: Option<String>,
    conversation: Arc<Mutex<Conversation>>,
    events: mpsc::Sender<TurnEvent>,
}

impl TurnController {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        speaker: Arc<dyn AvatarSpeaker>,
        capture: Arc<dyn CaptureControl>,
        timing: TurnTiming,
        session_id: Option<String>,
    ) -> (Self, mpsc::Receiver<TurnEvent>) {
        let (events, rx) = mpsc::channel(256);
        let controller = Self {
            backend,
            speaker,
            capture,
            timing,
            session_id,
            conversation: Arc::new(Mutex::new(Conversation {
                history: Vec::new(),
                phase: TurnPhase::Idle,
            })),
            events,
        };
        (controller, rx)
    }

    pub async fn phase(&self) -> TurnPhase {
        self.conversation.lock().await.phase
    }

    pub async fn history(&self) -> Vec<ChatMessage> {
        self.conversation.lock().await.history.clone()
    }

    /// Forgets the conversation when the session ends.
    pub async fn reset(&self) {
        let mut conversation = self.conversation.lock().await;
        conversation.history.clear();
        conversation.phase = TurnPhase::Idle;
    }

    async fn emit(&self, event: TurnEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event).await;
    }

    /// Sends one user utterance and streams the reply to the speaker.
    ///
    /// Returns the full reply once streaming is done. Capture resumes on its
    /// own after the settle time.
    pub async fn submit_transcript(&self, text: &str) -> Result<String> {
        let transcript = text.trim();
        if transcript.chars().count() < MIN_TRANSCRIPT_CHARS {
            tracing::debug!(transcript, "ignoring transcript below minimum length");
            return Err(ConsultError::validation("transcript too short"));
        }

        let history = {
            let mut conversation = self.conversation.lock().await;
            if conversation.phase != TurnPhase::Idle {
                return Err(ConsultError::TurnInProgress);
            }
            conversation.phase = TurnPhase::Generating;
            conversation.history.push(ChatMessage::user(transcript));
            conversation.history.clone()
        };

        if let Err(e) = self.capture.pause().await {
            tracing::warn!(error = %e, "failed to pause capture");
        }
        self.emit(TurnEvent::Started {
            transcript: transcript.to_string(),
        })
        .await;
        tracing::info!(history = history.len(), "turn started");

        let mut deltas = match self
            .backend
            .stream_reply(history, self.session_id.clone())
            .await
        {
            Ok(rx) => rx,
            Err(e) => return Err(self.abort_turn(e).await),
        };

        let mut reply = String::new();
        while let Some(delta) = deltas.recv().await {
            reply.push_str(&delta);
            if let Err(e) = self.speaker.speak_chunk(&delta).await {
                tracing::warn!(error = %e, "avatar failed to speak chunk");
            }
            self.emit(TurnEvent::Token(delta)).await;
        }

        let reply = reply.trim().to_string();
        if reply.is_empty() {
            return Err(self.abort_turn(ConsultError::EmptyReply).await);
        }

        if let Err(e) = self.speaker.finish().await {
            tracing::warn!(error = %e, "avatar failed to finish reply");
        }

        {
            let mut conversation = self.conversation.lock().await;
            conversation.history.push(ChatMessage::assistant(&reply));
            conversation.phase = TurnPhase::Speaking;
        }

        let settle = self.timing.settle_time(&reply);
        tracing::info!(
            words = reply.split_whitespace().count(),
            settle_ms = settle.as_millis() as u64,
            "reply complete"
        );
        self.emit(TurnEvent::Completed {
            reply: reply.clone(),
            settle,
        })
        .await;
        self.schedule_resume(settle);

        Ok(reply)
    }

    /// Rolls back the user message so a re-prompt does not duplicate it.
    async fn abort_turn(&self, error: ConsultError) -> ConsultError {
        tracing::error!(error = %error, "turn failed");
        {
            let mut conversation = self.conversation.lock().await;
            conversation.history.pop();
            conversation.phase = TurnPhase::Idle;
        }
        self.emit(TurnEvent::Failed(error.to_string())).await;
        self.schedule_resume(Duration::ZERO);
        error
    }

    fn schedule_resume(&self, after: Duration) {
        let capture = Arc::clone(&self.capture);
        let conversation = Arc::clone(&self.conversation);
        let events = self.events.clone();
        let retry_delay = self.timing.resume_retry_delay;

        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            {
                let mut conversation = conversation.lock().await;
                if conversation.phase == TurnPhase::Speaking {
                    conversation.phase = TurnPhase::Idle;
                }
            }

            let event = match capture.resume().await {
                Ok(()) => TurnEvent::CaptureResumed,
                Err(e) => {
                    tracing::warn!(error = %e, "capture resume failed, retrying");
                    tokio::time::sleep(retry_delay).await;
                    match capture.resume().await {
                        Ok(()) => TurnEvent::CaptureResumed,
                        Err(e) => {
                            tracing::error!(error = %e, "capture did not resume, giving up");
                            TurnEvent::CaptureResumeFailed
                        }
                    }
                }
            };
            let _ = events.send(event).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::MockChatBackend;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn reply_of(deltas: &'static [&'static str]) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(deltas.len().max(1));
        for delta in deltas {
            tx.try_send(delta.to_string()).unwrap();
        }
        rx
    }

    fn quiet_speaker() -> MockAvatarSpeaker {
        let mut speaker = MockAvatarSpeaker::new();
        speaker.expect_speak_chunk().returning(|_| Ok(()));
        speaker.expect_finish().returning(|| Ok(()));
        speaker
    }

    /// Records when pause and resume happened.
    fn recording_capture(log: Arc<StdMutex<Vec<(&'static str, Instant)>>>) -> MockCaptureControl {
        let mut capture = MockCaptureControl::new();
        let pauses = Arc::clone(&log);
        capture.expect_pause().returning(move || {
            pauses.lock().unwrap().push(("pause", Instant::now()));
            Ok(())
        });
        capture.expect_resume().returning(move || {
            log.lock().unwrap().push(("resume", Instant::now()));
            Ok(())
        });
        capture
    }

    fn controller(
        backend: MockChatBackend,
        capture: MockCaptureControl,
    ) -> (TurnController, mpsc::Receiver<TurnEvent>) {
        TurnController::new(
            Arc::new(backend),
            Arc::new(quiet_speaker()),
            Arc::new(capture),
            TurnTiming::default(),
            Some("s-1".to_string()),
        )
    }

    #[test]
    fn settle_time_adds_both_buffers_to_speaking_time() {
        let timing = TurnTiming::default();
        // 5 words at 150 wpm is two seconds of speech.
        assert_eq!(timing.speaking_time("one two three four five"), Duration::from_secs(2));
        assert_eq!(
            timing.settle_time("one two three four five"),
            Duration::from_millis(4500)
        );
    }

    #[tokio::test]
    async fn short_transcript_never_reaches_the_backend() {
        let mut backend = MockChatBackend::new();
        backend.expect_stream_reply().times(0);
        let mut capture = MockCaptureControl::new();
        capture.expect_pause().times(0);
        let (controller, _events) = controller(backend, capture);

        let err = controller.submit_transcript(" a ").await.unwrap_err();
        assert!(matches!(err, ConsultError::Validation(_)));
        assert!(controller.history().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn first_turn_sends_single_message_and_records_reply() {
        let mut backend = MockChatBackend::new();
        backend
            .expect_stream_reply()
            .withf(|history, session_id| {
                history.len() == 1
                    && history[0].text() == "I have fragile glassware"
                    && session_id.as_deref() == Some("s-1")
            })
            .times(1)
            .returning(|_, _| Ok(reply_of(&["We will ", "wrap it ", "carefully."])));
        let log = Arc::new(StdMutex::new(Vec::new()));
        let (controller, _events) = controller(backend, recording_capture(Arc::clone(&log)));

        let reply = controller
            .submit_transcript("I have fragile glassware")
            .await
            .unwrap();

        assert_eq!(reply, "We will wrap it carefully.");
        assert_eq!(controller.history().await.len(), 2);
        assert_eq!(controller.phase().await, TurnPhase::Speaking);
    }

    #[tokio::test(start_paused = true)]
    async fn capture_stays_paused_until_settle_time_elapses() {
        let mut backend = MockChatBackend::new();
        backend
            .expect_stream_reply()
            .returning(|_, _| Ok(reply_of(&["one two ", "three four five"])));
        let log = Arc::new(StdMutex::new(Vec::new()));
        let (controller, _events) = controller(backend, recording_capture(Arc::clone(&log)));

        let started = Instant::now();
        controller.submit_transcript("hello there").await.unwrap();

        // Two seconds of speech plus 2.5 s of buffers.
        tokio::time::sleep(Duration::from_millis(4400)).await;
        assert_eq!(log.lock().unwrap().len(), 1, "only the pause so far");
        assert_eq!(controller.phase().await, TurnPhase::Speaking);

        let err = controller.submit_transcript("are you there").await.unwrap_err();
        assert!(matches!(err, ConsultError::TurnInProgress));

        tokio::time::sleep(Duration::from_millis(200)).await;
        let log = log.lock().unwrap().clone();
        assert_eq!(log[0].0, "pause");
        assert_eq!(log[1].0, "resume");
        assert!(log[1].1 - started >= Duration::from_millis(4500));
        assert_eq!(controller.phase().await, TurnPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_turn_is_rolled_back() {
        let mut backend = MockChatBackend::new();
        backend.expect_stream_reply().times(1).returning(|_, _| {
            Err(ConsultError::Upstream {
                service: "chat completion",
                status: 500,
                body: "oops".into(),
            })
        });
        let log = Arc::new(StdMutex::new(Vec::new()));
        let (controller, mut events) = controller(backend, recording_capture(Arc::clone(&log)));

        let err = controller.submit_transcript("hello there").await.unwrap_err();
        assert!(err.is_upstream());
        assert!(controller.history().await.is_empty());
        assert_eq!(controller.phase().await, TurnPhase::Idle);

        assert!(matches!(events.recv().await, Some(TurnEvent::Started { .. })));
        assert!(matches!(events.recv().await, Some(TurnEvent::Failed(_))));
        assert_eq!(events.recv().await, Some(TurnEvent::CaptureResumed));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_reply_counts_as_failure() {
        let mut backend = MockChatBackend::new();
        backend
            .expect_stream_reply()
            .returning(|_, _| Ok(reply_of(&[])));
        let log = Arc::new(StdMutex::new(Vec::new()));
        let (controller, _events) = controller(backend, recording_capture(log));

        let err = controller.submit_transcript("hello there").await.unwrap_err();
        assert!(matches!(err, ConsultError::EmptyReply));
        assert!(controller.history().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn resume_is_retried_once_after_longer_delay() {
        let mut backend = MockChatBackend::new();
        backend
            .expect_stream_reply()
            .returning(|_, _| Ok(reply_of(&["ok"])));
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&attempts);
        let mut capture = MockCaptureControl::new();
        capture.expect_pause().returning(|| Ok(()));
        capture.expect_resume().returning(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(ConsultError::validation("recognizer busy"))
        });
        let (controller, mut events) = controller(backend, capture);

        controller.submit_transcript("hello there").await.unwrap();

        loop {
            match events.recv().await {
                Some(TurnEvent::CaptureResumeFailed) => break,
                Some(_) => continue,
                None => panic!("event channel closed"),
            }
        }
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
