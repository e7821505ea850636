//! cellterm runner
//!
//! Runs a program inside a pseudoterminal-backed session, waits for it to
//! exit and prints the final screen.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::mpsc;
use std::time::Duration;

use cellterm::{Config, Session, TerminalEvent};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "cellterm-run")]
#[command(version)]
#[command(about = "Run a program in a terminal session and print its final screen", long_about = None)]
struct Args {
    /// Path to a JSON config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Initial columns
    #[arg(long, value_name = "COLS")]
    cols: Option<u16>,

    /// Initial rows
    #[arg(long, value_name = "ROWS")]
    rows: Option<u16>,

    /// Give up after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Program and arguments; the configured shell when omitted
    #[arg(last = true, value_name = "PROGRAM")]
    command: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    match run(Args::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("cellterm-run: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut config = Config::load_or_default(args.config.as_deref())?;
    if let Some(cols) = args.cols {
        config.cols = cols;
    }
    if let Some(rows) = args.rows {
        config.rows = rows;
    }
    if let Some((program, rest)) = args.command.split_first() {
        config.program = Some(program.clone());
        config.args = rest.to_vec();
    }

    let (tx, rx) = mpsc::channel();
    let mut session: Session = Session::new(config, tx);
    session.start()?;

    let status = session.wait_exit(args.timeout.map(Duration::from_secs));
    for event in rx.try_iter() {
        match event {
            TerminalEvent::IoError(message) => tracing::warn!(%message, "terminal I/O error"),
            TerminalEvent::Damaged(_) => {}
            other => tracing::debug!(?other, "notification"),
        }
    }

    let snapshot = session.snapshot();
    session.close();
    print!("{}", snapshot.to_text());

    Ok(match status {
        Some(status) => {
            tracing::info!(%status, "child finished");
            let code = status.code().unwrap_or(1);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
        None => {
            tracing::warn!("timed out waiting for the child");
            ExitCode::FAILURE
        }
    })
}
