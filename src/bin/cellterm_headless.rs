//! cellterm headless runner
//!
//! Feeds a captured byte stream through the decoder and screen model and
//! prints the resulting screen. Useful for golden tests and for replaying
//! output captured from real programs.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use cellterm::{Terminal, TerminalEvent};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "cellterm-headless")]
#[command(version)]
#[command(about = "Replay terminal output and print the final screen", long_about = None)]
struct Args {
    /// Read bytes from FILE instead of stdin
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Write the snapshot to FILE instead of stdout
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Print plain screen text instead of JSON
    #[arg(short, long)]
    text: bool,

    /// Screen width
    #[arg(long, value_name = "COLS", default_value_t = 80)]
    cols: u16,

    /// Screen height
    #[arg(long, value_name = "ROWS", default_value_t = 24)]
    rows: u16,

    /// Feed the input in chunks of N bytes
    #[arg(long, value_name = "N")]
    chunk: Option<usize>,
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("cellterm-headless: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let input = match &args.input {
        Some(path) => fs::read(path)?,
        None => {
            let mut buf = Vec::new();
            io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };

    let mut terminal = Terminal::new(usize::from(args.cols), usize::from(args.rows));
    let chunk = args.chunk.unwrap_or(input.len()).max(1);
    for piece in input.chunks(chunk) {
        for notice in terminal.process(piece) {
            match notice {
                TerminalEvent::ResizeRequested { cols, rows } => {
                    terminal.resize(usize::from(cols), usize::from(rows));
                }
                other => tracing::debug!(?other, "notification"),
            }
        }
    }

    let snapshot = terminal.snapshot();
    let rendered = if args.text {
        snapshot.to_text()
    } else {
        snapshot.to_json()?
    };

    match &args.output {
        Some(path) => fs::write(path, rendered)?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(rendered.as_bytes())?;
            if !rendered.ends_with('\n') {
                stdout.write_all(b"\n")?;
            }
        }
    }
    Ok(())
}
