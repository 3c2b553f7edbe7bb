use std::io::IsTerminal;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tracing::info;

use dbcanon::output::raw::RawSink;
use dbcanon::output::{self, OutputSink};
use dbcanon::reader::{self, Input, ReaderMessage};
use dbcanon::source::LogFormat;
use dbcanon::stats::StatsCollector;
use dbcanon::MySqlCanonicalQuery;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    Raw,
    Tui,
}

#[derive(Parser, Debug)]
#[command(name = "dbcanon", about = "Group MySQL/MariaDB query logs by canonical query")]
struct Cli {
    /// Log file to read. Reads stdin when omitted.
    file: Option<PathBuf>,

    /// Input log format
    #[arg(short = 'f', long = "format", value_enum, default_value_t = LogFormat::General)]
    format: LogFormat,

    /// Output mode: raw (stdout) or tui (dashboard). Auto-detected if omitted.
    #[arg(short = 'm', long = "mode")]
    mode: Option<Mode>,

    /// Keep reading as the file grows
    #[arg(long)]
    follow: bool,

    /// Show canonical queries instead of the raw statements
    #[arg(short = 'c', long)]
    canonical: bool,

    /// Number of digests in the summary (0 disables it)
    #[arg(short = 'n', long = "top", default_value = "10")]
    top: usize,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// Raw mode: only print queries at least this slow (ms).
    /// TUI: highlight them (default 100).
    #[arg(short = 't', long = "threshold")]
    threshold_ms: Option<u64>,

    /// Print the canonical form of one statement and exit
    #[arg(short = 'e', long = "execute", value_name = "SQL")]
    execute: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(sql) = &cli.execute {
        println!("{}", MySqlCanonicalQuery::new(sql.as_str()));
        return Ok(());
    }

    if let Some(path) = &cli.file {
        std::fs::metadata(path).with_context(|| format!("cannot read {}", path.display()))?;
    }

    let mode = cli.mode.unwrap_or_else(|| {
        if std::io::stdout().is_terminal() && cli.file.is_some() {
            Mode::Tui
        } else {
            Mode::Raw
        }
    });

    let use_tui = matches!(mode, Mode::Tui);

    if !use_tui {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("dbcanon=info".parse()?))
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let input = cli.file.clone().map_or(Input::Stdin, Input::File);
    let source = input.label();

    let (tx, rx) = mpsc::channel::<ReaderMessage>(1024);
    let reader_handle = tokio::spawn(reader::run_reader(input, cli.format, cli.follow, tx));

    if use_tui {
        let threshold_ms = cli.threshold_ms.unwrap_or(100);
        output::tui::run_tui(rx, source, cli.canonical, threshold_ms).await?;
    } else {
        let threshold = Duration::from_millis(cli.threshold_ms.unwrap_or(0));
        let sink = RawSink::new(cli.canonical, threshold, cli.top, cli.json);
        run_raw_mode(rx, sink).await;
    }

    reader_handle.abort();
    match reader_handle.await {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn run_raw_mode(mut rx: mpsc::Receiver<ReaderMessage>, mut sink: RawSink) {
    let mut stats = StatsCollector::new();

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(ReaderMessage::Event(event)) => {
                    if let Some(display_event) = stats.process_event(event) {
                        sink.handle_event(&display_event);
                    }
                }
                Some(ReaderMessage::Finished) | None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down...");
                break;
            }
        }
    }

    sink.shutdown(&stats);
}
