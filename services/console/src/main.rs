mod devices;
mod http;

use crate::devices::{DirectoryRecorder, ImageFileSource, LineRecognizer, TerminalSpeaker};
use crate::http::ApiClient;
use anyhow::{Context, Result};
use clap::Parser;
use consult_core::context_store::ContextStore;
use consult_core::openai::{OpenAiClient, OpenAiConfig};
use consult_core::speech::{CaptureState, RecordedTranscription, SpeechCapture};
use consult_core::turn::{TurnController, TurnEvent, TurnTiming};
use consult_core::vision::VisionPoller;
use consult_types::session::EndReason;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::Level;
use tracing_subscriber::fmt::time::ChronoLocal;

/// Client-side session length; the server enforces its own timeout too.
const CLIENT_SESSION_LIMIT: Duration = Duration::from_secs(30 * 60);

#[derive(Parser)]
#[command(version, about = "Talk to the moving consultant from a terminal")]
struct Cli {
    /// Base URL of the consultation API
    #[arg(long, default_value = "http://localhost:3000")]
    api_url: String,

    /// Image file to use as the camera; re-read on every vision tick
    #[arg(long)]
    frames: Option<PathBuf>,

    /// Directory of recorded audio chunks for the transcription fallback
    #[arg(long)]
    audio_dir: Option<PathBuf>,

    /// Seconds between vision ticks
    #[arg(long, default_value_t = 10)]
    vision_interval: u64,

    #[arg(long, default_value = "warn")]
    log_level: Level,
}

/// Forwards stdin lines; fires `eof` when the terminal closes.
fn spawn_stdin_reader(lines: mpsc::Sender<String>, eof: oneshot::Sender<()>) {
    tokio::spawn(async move {
        let mut reader = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        loop {
            match reader.next_line().await {
                Ok(Some(line)) => {
                    if lines.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "stdin read failed");
                    break;
                }
            }
        }
        let _ = eof.send(());
    });
}

fn spawn_event_printer(mut events: mpsc::Receiver<TurnEvent>) {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                TurnEvent::Started { transcript } => eprintln!("you: {transcript}"),
                TurnEvent::Failed(message) => eprintln!("[turn failed: {message}]"),
                TurnEvent::CaptureResumeFailed => {
                    eprintln!("[microphone did not come back, press Enter to retry]")
                }
                TurnEvent::Completed { settle, .. } => {
                    tracing::debug!(settle_ms = settle.as_millis() as u64, "reply finished")
                }
                TurnEvent::Token(_) | TurnEvent::CaptureResumed => {}
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let api = ApiClient::new(&cli.api_url);
    let session = api
        .request_session()
        .await
        .context("Failed to start a consultation session")?;
    let session_id = session.session_id.clone();
    tracing::info!(session_id = %session_id, "session started");
    eprintln!("Connected. Type what you would say, Ctrl-D to hang up.");

    // --- Speech capture ---
    let (line_tx, line_rx) = mpsc::channel(32);
    let (eof_tx, mut eof_rx) = oneshot::channel();
    spawn_stdin_reader(line_tx, eof_tx);

    let mut capture = SpeechCapture::new(Box::new(LineRecognizer::new(line_rx)));
    if let Some(dir) = &cli.audio_dir {
        match std::env::var("OPENAI_API_KEY") {
            Ok(key) if !key.trim().is_empty() => {
                let transcriber = Arc::new(OpenAiClient::new(OpenAiConfig::new(&key)));
                capture = capture.with_fallback(Box::new(RecordedTranscription::new(
                    DirectoryRecorder::new(dir),
                    transcriber,
                )));
            }
            _ => tracing::warn!("OPENAI_API_KEY not set, audio fallback disabled"),
        }
    }
    let (transcript_tx, mut transcripts) = mpsc::channel(16);
    let capture = capture.spawn(transcript_tx);

    // --- Turn controller ---
    let (controller, events) = TurnController::new(
        Arc::new(api.clone()),
        Arc::new(TerminalSpeaker),
        Arc::new(capture.clone()),
        TurnTiming::default(),
        Some(session_id.clone()),
    );
    let controller = Arc::new(controller);
    spawn_event_printer(events);

    // --- Vision ---
    let (vision_stop, vision_stop_rx) = watch::channel(false);
    let poller = cli.frames.as_ref().map(|frames| {
        VisionPoller::new(
            Arc::new(ImageFileSource::new(frames)),
            Arc::new(api.clone()),
            Arc::new(ContextStore::default()),
            Some(session_id.clone()),
        )
        .with_interval(Duration::from_secs(cli.vision_interval.max(1)))
        .spawn(vision_stop_rx)
    });

    // --- Conversation loop ---
    let session_timer = tokio::time::sleep(CLIENT_SESSION_LIMIT);
    tokio::pin!(session_timer);
    let reason = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break EndReason::Stop,
            _ = &mut session_timer => {
                eprintln!("Session time limit reached.");
                break EndReason::Timeout;
            }
            _ = &mut eof_rx => break EndReason::Stop,
            transcript = transcripts.recv() => {
                let Some(transcript) = transcript else {
                    break EndReason::Stop;
                };
                let controller = Arc::clone(&controller);
                tokio::spawn(async move {
                    if let Err(e) = controller.submit_transcript(&transcript).await {
                        tracing::debug!(error = %e, "turn not completed");
                    }
                });
            }
        }
        if capture.state() == CaptureState::Stopped {
            eprintln!("Speech capture stopped.");
            break EndReason::Stop;
        }
    };

    // --- Cleanup ---
    let _ = vision_stop.send(true);
    capture.stop().await;
    controller.reset().await;
    if let Some(poller) = poller {
        let _ = poller.await;
    }
    match api.end_session(&session_id, reason).await {
        Ok(response) => tracing::info!(session_id = %session_id, message = %response.message, "session ended"),
        Err(e) => tracing::error!(session_id = %session_id, error = %e, "failed to end session"),
    }
    eprintln!("Goodbye.");
    Ok(())
}
