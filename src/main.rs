//! bbsterm - BBS terminal client
//!
//! Headless front-end: dials a board, repaints the emulated screen on an
//! interval, and feeds line input (plus `/upload` and `/quit` commands) to
//! the wire. A richer renderer would consume the same snapshot API.

use anyhow::Context;
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};

use bbsterm::{ClientConfig, Key, Session, SessionConfig, SessionEvent, TerminalSize};

/// BBS terminal client
#[derive(Parser, Debug)]
#[command(
    name = "bbsterm",
    version,
    about = "Connect to a BBS over telnet with ANSI emulation and ZMODEM transfers",
    long_about = None
)]
struct Cli {
    /// Host to dial (defaults to the configured host)
    host: Option<String>,

    /// Port number
    #[arg(short, long)]
    port: Option<u16>,

    /// Session name used for the capture log
    #[arg(short, long)]
    name: Option<String>,

    /// Directory for ZMODEM downloads
    #[arg(long)]
    download_dir: Option<PathBuf>,

    /// Directory for capture logs
    #[arg(long)]
    logs_dir: Option<PathBuf>,

    /// Disable the session capture log
    #[arg(long)]
    no_log: bool,

    /// Screen repaint interval in milliseconds
    #[arg(long, default_value = "250")]
    refresh_ms: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let defaults = ClientConfig::load().unwrap_or_default();

    let host = cli.host.unwrap_or_else(|| defaults.host.clone());
    let name = cli.name.unwrap_or_else(|| host.clone());
    let mut config = SessionConfig::new(&name, &host)
        .port(cli.port.unwrap_or(defaults.port))
        .download_dir(&cli.download_dir.unwrap_or_else(|| defaults.download_dir.clone()))
        .logs_dir(&cli.logs_dir.unwrap_or_else(|| defaults.logs_dir.clone()))
        .logging(!cli.no_log && defaults.logging_enabled);
    config.size = TerminalSize::new(defaults.terminal.cols, defaults.terminal.rows);

    let (session, mut events) = Session::connect(config)
        .await
        .with_context(|| format!("connecting to {host}"))?;
    eprintln!("connected to {}", session.connection_info());

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    let mut repaint = tokio::time::interval(Duration::from_millis(cli.refresh_ms.max(50)));
    let mut status = String::new();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Disconnected(reason)) => {
                    eprintln!("\ndisconnected: {reason}");
                    break;
                }
                Some(SessionEvent::ZmodemStarted { name, size }) => {
                    status = format!("transfer: {name} ({size} bytes)");
                }
                Some(SessionEvent::ZmodemProgress { bytes, total, rate_kbps }) => {
                    status = format!("transfer: {bytes}/{total} bytes ({rate_kbps:.1} kB/s)");
                }
                Some(SessionEvent::ZmodemFinished { path, success }) => {
                    status = if success {
                        format!("transfer done: {}", path.display())
                    } else {
                        "transfer aborted".to_string()
                    };
                }
                Some(SessionEvent::ZmodemError(message)) => {
                    status = format!("transfer failed: {message}");
                }
                Some(SessionEvent::Error(message)) => {
                    status = format!("error: {message}");
                }
                Some(SessionEvent::Connected(_)) => {}
                None => break,
            },
            line = input.next_line() => match line {
                Ok(Some(line)) => {
                    if let Some(path) = line.strip_prefix("/upload ") {
                        if let Err(e) = session.upload(&PathBuf::from(path.trim())).await {
                            status = format!("upload failed: {e}");
                        }
                    } else if line.trim() == "/quit" {
                        session.disconnect().await;
                        break;
                    } else {
                        session.send_text(&line).await.ok();
                        session.send_key(Key::Enter).await.ok();
                    }
                }
                Ok(None) | Err(_) => {
                    session.disconnect().await;
                    break;
                }
            },
            _ = repaint.tick() => {
                paint(&session, &status)?;
            }
        }
    }

    Ok(())
}

/// Repaint the emulated screen on the local terminal.
fn paint(session: &Session, status: &str) -> anyhow::Result<()> {
    let snapshot = session.snapshot();
    let mut out = String::with_capacity(snapshot.cells.len() * 2);
    out.push_str("\x1b[H");

    let mut last_fg = None;
    let mut last_bg = None;
    for row in 0..snapshot.rows {
        for col in 0..snapshot.cols {
            if let Some(cell) = snapshot.cell(col, row) {
                if last_fg != Some(cell.fg) {
                    let (r, g, b) = cell.fg;
                    out.push_str(&format!("\x1b[38;2;{r};{g};{b}m"));
                    last_fg = Some(cell.fg);
                }
                if last_bg != Some(cell.bg) {
                    let (r, g, b) = cell.bg;
                    out.push_str(&format!("\x1b[48;2;{r};{g};{b}m"));
                    last_bg = Some(cell.bg);
                }
                out.push(cell.ch);
            }
        }
        out.push_str("\x1b[0m\r\n");
        last_fg = None;
        last_bg = None;
    }
    out.push_str(&format!(
        "\x1b[0m[{}:{}] {status}\x1b[K",
        snapshot.cursor.col, snapshot.cursor.row
    ));

    let mut stdout = std::io::stdout().lock();
    stdout.write_all(out.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
