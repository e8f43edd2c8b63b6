//! `relink` binary: pipes standard input lines to a named endpoint.
//!
//! Each line read from stdin is sent through a [`Session`]; every session
//! event is logged. Ctrl-C or end of input disconnects cleanly.

mod cli;

use std::{error::Error, fs, io};

use clap::Parser;
use relink::{
    LogLevel,
    Session,
    SessionConfig,
    SessionEvent,
    message::Message,
};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    sync::broadcast::{self, error::RecvError},
};
use tracing::{debug, error, info, warn};

fn load_config(cli: &cli::Cli) -> Result<SessionConfig, Box<dyn Error>> {
    let mut config = match &cli.config {
        Some(path) => SessionConfig::from_json(&fs::read_to_string(path)?)?,
        None => SessionConfig::default(),
    };
    if let Some(max_attempts) = cli.max_attempts {
        config.max_attempts = max_attempts;
    }
    if let Some(timeout) = cli.connect_timeout_ms {
        config.connect_timeout_ms = timeout;
    }
    if let Some(delay) = cli.base_delay_ms {
        config.base_delay_ms = delay;
    }
    if let Some(delay) = cli.max_delay_ms {
        config.max_delay_ms = delay;
    }
    if let Some(level) = &cli.log_level {
        config.log_level = level.parse::<LogLevel>()?;
    }
    Ok(config)
}

async fn log_events(mut events: broadcast::Receiver<SessionEvent>) {
    loop {
        match events.recv().await {
            Ok(SessionEvent::Data(message)) => match message {
                Message::Json(value) => println!("{value}"),
                Message::Text(text) => println!("{text}"),
                Message::Binary(bytes) => debug!(len = bytes.len(), "binary data"),
            },
            Ok(SessionEvent::Error(cause) | SessionEvent::ConnectionFailed(cause)) => {
                warn!(%cause, "session error");
            }
            Ok(SessionEvent::MaxRetriesExceeded(cause)) => error!(%cause, "giving up"),
            Ok(SessionEvent::ErrorThreshold(snapshot)) => {
                warn!(
                    error_count = snapshot.error_count,
                    connected = snapshot.connected,
                    "error threshold reached"
                );
            }
            Ok(event) => info!(event = event.name(), "session event"),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event receiver lagged"),
            Err(RecvError::Closed) => return,
        }
    }
}

/// Send each non-blank line of `input` until it ends or `shutdown`
/// resolves. A send still connecting or backing off is abandoned on
/// shutdown.
async fn forward_lines<R>(
    session: &Session,
    input: R,
    shutdown: impl Future<Output = io::Result<()>>,
) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    tokio::pin!(shutdown);
    loop {
        let line = tokio::select! {
            result = &mut shutdown => return result,
            line = lines.next_line() => line?,
        };
        match line {
            Some(line) if line.trim().is_empty() => {}
            Some(line) => tokio::select! {
                result = &mut shutdown => return result,
                sent = session.send(line) => {
                    if let Err(error) = sent {
                        error!(%error, "send failed");
                    }
                }
            },
            None => return Ok(()),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = cli::Cli::parse();
    let config = load_config(&cli)?;

    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt()
        .with_max_level(config.log_level.level_filter())
        .init();

    let session = Session::builder(&cli.endpoint).config(&config).build();
    info!(
        endpoint = %session.endpoint().name(),
        address = %session.endpoint().address(),
        "starting session"
    );
    let events = tokio::spawn(log_events(session.subscribe()));

    forward_lines(
        &session,
        BufReader::new(tokio::io::stdin()),
        tokio::signal::ctrl_c(),
    )
    .await?;

    session.disconnect().await;
    drop(session);
    events.abort();
    Ok(())
}
