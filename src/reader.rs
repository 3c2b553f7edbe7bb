use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tracing::{debug, info, trace};

use crate::source::{LogEvent, LogFormat, LogParser};

const FOLLOW_POLL: Duration = Duration::from_millis(250);

pub enum ReaderMessage {
    Event(LogEvent),
    /// Input exhausted; no more events will follow.
    Finished,
}

#[derive(Clone, Debug)]
pub enum Input {
    File(PathBuf),
    Stdin,
}

impl Input {
    pub fn label(&self) -> String {
        match self {
            Input::File(path) => path.display().to_string(),
            Input::Stdin => "stdin".to_string(),
        }
    }
}

/// Read `input` to the end, sending every parsed event. In follow mode a file
/// is polled for appended data instead of finishing.
pub async fn run_reader(
    input: Input,
    format: LogFormat,
    follow: bool,
    tx: mpsc::Sender<ReaderMessage>,
) -> anyhow::Result<()> {
    let parser = format.parser();
    info!("Reading {} as {} log", input.label(), parser.format_name());

    let sent = match &input {
        Input::File(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?;
            relay(file, parser, follow, &tx).await?
        }
        Input::Stdin => {
            if follow {
                debug!("--follow has no effect on stdin");
            }
            relay(tokio::io::stdin(), parser, false, &tx).await?
        }
    };

    info!("Finished {}: {sent} events", input.label());
    let _ = tx.send(ReaderMessage::Finished).await;
    Ok(())
}

async fn relay<R: AsyncRead + Unpin>(
    mut reader: R,
    mut parser: Box<dyn LogParser>,
    follow: bool,
    tx: &mpsc::Sender<ReaderMessage>,
) -> anyhow::Result<u64> {
    let mut buf = vec![0u8; 16384];
    let mut parse_buf = BytesMut::with_capacity(16384);
    let mut sent = 0;

    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            if follow {
                tokio::time::sleep(FOLLOW_POLL).await;
                continue;
            }
            break;
        }

        parse_buf.extend_from_slice(&buf[..n]);
        if !drain(parser.as_mut(), &mut parse_buf, false, tx, &mut sent).await {
            debug!("Receiver closed, stopping reader");
            return Ok(sent);
        }
    }

    drain(parser.as_mut(), &mut parse_buf, true, tx, &mut sent).await;
    if !parse_buf.is_empty() {
        debug!("Discarding {} trailing bytes", parse_buf.len());
    }
    Ok(sent)
}

/// Send every complete event in `parse_buf`. Returns false once the
/// receiving side is gone.
async fn drain(
    parser: &mut dyn LogParser,
    parse_buf: &mut BytesMut,
    eof: bool,
    tx: &mpsc::Sender<ReaderMessage>,
    sent: &mut u64,
) -> bool {
    while let Some((event, consumed)) = parser.try_parse(parse_buf, eof) {
        if consumed == 0 {
            break;
        }
        let _ = parse_buf.split_to(consumed);

        if event == LogEvent::Unknown {
            trace!("Skipped {consumed} bytes");
            continue;
        }
        if tx.send(ReaderMessage::Event(event)).await.is_err() {
            return false;
        }
        *sent += 1;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(mut rx: mpsc::Receiver<ReaderMessage>) -> (Vec<LogEvent>, bool) {
        let mut events = Vec::new();
        let mut finished = false;
        while let Some(msg) = rx.recv().await {
            match msg {
                ReaderMessage::Event(event) => events.push(event),
                ReaderMessage::Finished => finished = true,
            }
        }
        (events, finished)
    }

    fn sql_of(event: &LogEvent) -> &str {
        match event {
            LogEvent::Query { sql, .. } => sql,
            other => panic!("expected query, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_relay_plain_sql() {
        let (tx, rx) = mpsc::channel(16);
        let input: &[u8] = b"SELECT 1;\n-- note\nUPDATE t SET a = 'x;y' WHERE id = 2;\nSELECT 3";
        let sent = relay(input, LogFormat::Plain.parser(), false, &tx).await.unwrap();
        drop(tx);

        let (events, _) = collect(rx).await;
        assert_eq!(sent, 3);
        let sqls: Vec<_> = events.iter().map(sql_of).collect();
        assert_eq!(
            sqls,
            vec!["SELECT 1", "-- note\nUPDATE t SET a = 'x;y' WHERE id = 2", "SELECT 3"]
        );
    }

    #[tokio::test]
    async fn test_relay_general_log_skips_unknown() {
        let (tx, rx) = mpsc::channel(16);
        let input: &[u8] = b"Time                 Id Command    Argument\n\
2024-03-01T10:00:00.100000Z\t    3 Connect\troot@localhost on  using Socket\n\
2024-03-01T10:00:00.200000Z\t    3 Query\tSELECT 1\n\
2024-03-01T10:00:00.300000Z\t    3 Quit\t\n";
        relay(input, LogFormat::General.parser(), false, &tx).await.unwrap();
        drop(tx);

        let (events, _) = collect(rx).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], LogEvent::ConnectionOpened { conn_id: 3 });
        assert_eq!(sql_of(&events[1]), "SELECT 1");
        assert_eq!(events[2], LogEvent::ConnectionClosed { conn_id: 3 });
    }

    #[tokio::test]
    async fn test_run_reader_file() {
        let path = std::env::temp_dir().join(format!("dbcanon-reader-{}.sql", std::process::id()));
        tokio::fs::write(&path, "SELECT 1;SELECT 2;").await.unwrap();

        let (tx, rx) = mpsc::channel(16);
        run_reader(Input::File(path.clone()), LogFormat::Plain, false, tx)
            .await
            .unwrap();
        let _ = tokio::fs::remove_file(&path).await;

        let (events, finished) = collect(rx).await;
        assert_eq!(events.len(), 2);
        assert!(finished);
    }

    #[tokio::test]
    async fn test_run_reader_missing_file() {
        let (tx, _rx) = mpsc::channel(1);
        let err = run_reader(
            Input::File(PathBuf::from("/nonexistent/dbcanon.log")),
            LogFormat::General,
            false,
            tx,
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("failed to open /nonexistent/dbcanon.log"));
    }

    #[tokio::test]
    async fn test_stops_when_receiver_dropped() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let input: &[u8] = b"SELECT 1;SELECT 2;";
        let sent = relay(input, LogFormat::Plain.parser(), false, &tx).await.unwrap();
        assert_eq!(sent, 0);
    }
}
