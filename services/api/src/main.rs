use anyhow::{Context, Result};
use consult_api::config::Config;
use consult_api::routes;
use consult_api::state::{AppState, Collaborators};
use consult_core::openai::{OpenAiClient, OpenAiConfig};
use consult_core::platform::AvatarPlatformAdapter;
use consult_core::prompts::Prompts;
use consult_core::{ShutdownCause, ShutdownSignal};
use consult_types::PersonaConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::fmt::time::ChronoLocal;

fn build_persona(config: &Config, prompts: &Prompts) -> PersonaConfig {
    let mut builder = PersonaConfig::builder()
        .with_system_prompt(prompts.persona())
        .with_max_session_length_seconds(config.lifecycle.session_timeout.as_secs());
    if let Some(avatar_id) = &config.avatar_id {
        builder = builder.with_avatar_id(avatar_id);
    }
    if let Some(voice_id) = &config.voice_id {
        builder = builder.with_voice_id(voice_id);
    }
    if let Some(llm) = &config.persona_llm {
        builder = builder.with_llm_id(llm);
    }
    builder.build()
}

/// Feeds OS signals into the shutdown latch.
fn spawn_signal_listener(shutdown: ShutdownSignal) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let (mut term, mut usr2) = match (
                signal(SignalKind::terminate()),
                signal(SignalKind::user_defined2()),
            ) {
                (Ok(term), Ok(usr2)) => (term, usr2),
                (Err(e), _) | (_, Err(e)) => {
                    tracing::error!(error = %e, "failed to install signal handlers, only Ctrl-C is handled");
                    if tokio::signal::ctrl_c().await.is_ok() {
                        shutdown.trigger(ShutdownCause::Interrupt);
                    }
                    return;
                }
            };
            let cause = tokio::select! {
                _ = tokio::signal::ctrl_c() => ShutdownCause::Interrupt,
                _ = term.recv() => ShutdownCause::Terminate,
                _ = usr2.recv() => ShutdownCause::Restart,
            };
            shutdown.trigger(cause);
        }
        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.trigger(ShutdownCause::Interrupt);
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load application configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    tracing::info!("Configuration loaded successfully. Starting consultation API...");

    // --- 3. Shutdown wiring ---
    let shutdown = ShutdownSignal::new();
    spawn_signal_listener(shutdown.clone());
    let panic_shutdown = shutdown.clone();
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        default_hook(info);
        panic_shutdown.trigger(ShutdownCause::Panic);
    }));

    // --- 4. Load Prompts ---
    let prompts = Prompts::load_or_default(&config.prompts_dir);
    let persona = build_persona(&config, &prompts);

    // --- 5. Initialize API Clients ---
    let mut avatar_config = avatar_client::Config::builder().with_api_key(&config.avatar_api_key);
    if let Some(url) = &config.avatar_base_url {
        avatar_config = avatar_config.with_base_url(url);
    }
    let avatar = avatar_client::Client::new(avatar_config.build());

    let mut openai_config = OpenAiConfig::new(&config.openai_api_key);
    if let Some(url) = &config.openai_base_url {
        openai_config = openai_config.with_base_url(url);
    }
    openai_config.chat_model = config.chat_model.clone();
    openai_config.vision_model = config.vision_model.clone();
    openai_config.transcription_model = config.transcription_model.clone();
    let openai = Arc::new(OpenAiClient::new(openai_config));

    // --- 6. Application Setup ---
    let state = AppState::new(
        Collaborators {
            platform: Arc::new(AvatarPlatformAdapter::new(avatar.clone())),
            completion: openai.clone(),
            analyzer: openai,
        },
        prompts,
        persona,
        config.lifecycle.clone(),
        config.vision_staleness,
        shutdown.clone(),
    );
    let lifecycle = state.lifecycle.clone();
    let watchdog = lifecycle.spawn_watchdog();

    // --- 7. Serve ---
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    tracing::info!(address = %config.bind_address, "listening");

    let graceful = shutdown.clone();
    axum::serve(
        listener,
        routes::router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let cause = graceful.wait().await;
        tracing::info!(%cause, "stopping HTTP server");
    })
    .await
    .context("HTTP server failed")?;

    // --- 8. Cleanup ---
    // Covers the case where the server exited on its own.
    shutdown.trigger(ShutdownCause::Terminate);
    let cause = shutdown.cause().unwrap_or(ShutdownCause::Terminate);
    let ended = lifecycle.flush_all(cause).await;
    if let Err(e) = watchdog.await {
        tracing::warn!(error = %e, "watchdog task did not finish cleanly");
    }

    let stats = avatar.stats();
    let total_minutes = lifecycle.usage().total_minutes().await;
    tracing::info!(
        ended,
        tokens_issued = stats.tokens_issued(),
        sessions_stopped = stats.sessions_stopped(),
        stop_failures = stats.stop_failures(),
        total_minutes_used = %format!("{:.1}", total_minutes),
        "shutdown complete"
    );
    Ok(())
}
