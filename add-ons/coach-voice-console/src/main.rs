//! Coach Voice console: run one mock interview from a terminal.
//!
//! Each stdin line is heard as a final transcript fragment while the
//! microphone is open. The interviewer's lines are printed and, with the
//! `speaker` feature, played on the default output device.
//!
//! Commands: `/send` (send now), `/interim <text>`, `/end` (wrap up),
//! `/log` (print the conversation), `/quit`.

use anyhow::Context;
use coach_voice::{
    AudioSink, BackendKind, ChannelRecognizer, CoachApiClient, Collaborators, CoordinatorState, DialogueClient,
    NullSink, OpenAiDialogue, OpenAiTts, RecognizerFeed, Role, SessionEvent, SessionHandle, SpeechSynthesizer,
    TurnCoordinator, VoiceConfig,
};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn backends(config: &VoiceConfig) -> anyhow::Result<(Arc<dyn DialogueClient>, Arc<dyn SpeechSynthesizer>)> {
    let timeout = config.request_timeout();
    match config.backend {
        BackendKind::Coach => {
            let client = Arc::new(CoachApiClient::new(&config.api, timeout).context("coach backend")?);
            let dialogue: Arc<dyn DialogueClient> = client.clone();
            let synthesizer: Arc<dyn SpeechSynthesizer> = client;
            Ok((dialogue, synthesizer))
        }
        BackendKind::Openai => {
            let dialogue: Arc<dyn DialogueClient> = Arc::new(
                OpenAiDialogue::new(&config.openai, &config.brief, &config.closing_message, timeout)
                    .context("openai dialogue")?,
            );
            let synthesizer: Arc<dyn SpeechSynthesizer> =
                Arc::new(OpenAiTts::new(&config.openai, timeout).context("openai speech")?);
            Ok((dialogue, synthesizer))
        }
    }
}

#[cfg(feature = "speaker")]
fn speaker() -> Arc<dyn AudioSink> {
    match coach_voice::RodioSink::new() {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            warn!(error = %e, "no output device, interviewer will be silent");
            Arc::new(NullSink)
        }
    }
}

#[cfg(not(feature = "speaker"))]
fn speaker() -> Arc<dyn AudioSink> {
    info!("built without the speaker feature, interviewer lines are printed only");
    Arc::new(NullSink)
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::TurnAppended(turn) => match turn.role {
            Role::Agent => println!("\ninterviewer> {}", turn.text),
            Role::User => println!("you> {}", turn.text),
        },
        SessionEvent::StateChanged {
            to: CoordinatorState::Listening,
            ..
        } => println!("[listening]"),
        SessionEvent::StateChanged {
            to: CoordinatorState::Processing,
            ..
        } => println!("[thinking...]"),
        SessionEvent::Transcript { committed, interim } if !committed.is_empty() || !interim.is_empty() => {
            println!("  ... {} {}", committed, interim)
        }
        SessionEvent::Error(message) => println!("[error] {}", message),
        SessionEvent::CloseRejected { user_turns, required } => println!(
            "[answer at least {} questions before ending, {} so far]",
            required, user_turns
        ),
        SessionEvent::Ended(reason) => println!("[session ended: {:?}]", reason),
        _ => {}
    }
}

async fn on_line(line: &str, handle: &SessionHandle, feed: &RecognizerFeed) -> anyhow::Result<bool> {
    let line = line.trim();
    match line {
        "" => {}
        "/quit" => {
            let _ = handle.shutdown().await;
            return Ok(false);
        }
        "/send" => handle.send_now().await?,
        "/end" => handle.end_session().await?,
        "/log" => {
            for turn in handle.conversation().await? {
                println!("{:>6}: {}", turn.role.as_chat_role(), turn.text);
            }
        }
        _ => {
            let heard = match line.strip_prefix("/interim ") {
                Some(text) => feed.push_interim(text),
                None => feed.push_final(line),
            };
            if !heard {
                println!("[mic closed, not heard]");
            }
        }
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[coach-voice-console] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = VoiceConfig::load().context("load voice config")?;
    let (dialogue, synthesizer) = backends(&config)?;
    let (recognizer, feed) = ChannelRecognizer::new();

    let handle = TurnCoordinator::new(
        &config,
        Collaborators {
            recognizer: Box::new(recognizer),
            dialogue,
            synthesizer,
            sink: speaker(),
        },
    )
    .spawn();
    info!(session = %handle.session_id(), backend = ?config.backend, "mock interview starting");

    let mut events = handle.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    print_event(&event);
                    if matches!(event, SessionEvent::Ended(_)) {
                        break;
                    }
                }
                Err(RecvError::Lagged(missed)) => warn!(missed, "console fell behind session events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    handle.start().await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => match on_line(&line, &handle, &feed).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        warn!(error = %e, "session no longer accepts commands");
                        break;
                    }
                },
                None => {
                    let _ = handle.shutdown().await;
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                let _ = handle.shutdown().await;
                break;
            }
            _ = handle.wait_for_state(CoordinatorState::Ended) => break,
        }
    }

    let turns = handle.join().await?;
    let _ = printer.await;
    info!(turns = turns.len(), "mock interview finished");
    Ok(())
}
