use async_trait::async_trait;
use serde::Deserialize;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use procstream_types::StreamKind;

/// Buffered events between the pipe readers and the streamer
const EVENT_BUFFER: usize = 256;

/// Errors raised while attaching to or reading from a process
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("process {0} pipe was not captured")]
    MissingPipe(&'static str),

    #[error("failed to read process output: {0}")]
    Read(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// One event observed on an attachment
#[derive(Debug)]
pub enum SourceEvent {
    Line { stream: StreamKind, text: String },
    Failed(SourceError),
}

/// A live connection to a process's output
///
/// Events arrive in emission order; `next` returns `None` once the
/// attachment has closed. Dropping the attachment kills the process.
pub struct Attachment {
    events: mpsc::Receiver<SourceEvent>,
    child: Option<Child>,
}

impl Attachment {
    /// Attachment fed by an arbitrary event channel
    pub fn new(events: mpsc::Receiver<SourceEvent>) -> Self {
        Self {
            events,
            child: None,
        }
    }

    fn with_child(events: mpsc::Receiver<SourceEvent>, child: Child) -> Self {
        Self {
            events,
            child: Some(child),
        }
    }

    /// Next event, or `None` when the attachment has closed
    pub async fn next(&mut self) -> Option<SourceEvent> {
        self.events.recv().await
    }

    /// OS process id of the attached process, if there is one
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(Child::id)
    }
}

/// Something the streamer can attach to
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn attach(&self) -> Result<Attachment, SourceError>;

    /// Human readable description for log output
    fn describe(&self) -> String;
}

/// Command used to follow a managed process's logs
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ProcessCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl ProcessCommand {
    /// `pm2 logs <process> --raw --lines 0`
    pub fn pm2(process_name: &str) -> Self {
        Self {
            program: "pm2".to_string(),
            args: vec![
                "logs".to_string(),
                process_name.to_string(),
                "--raw".to_string(),
                "--lines".to_string(),
                "0".to_string(),
            ],
        }
    }
}

impl Default for ProcessCommand {
    fn default() -> Self {
        Self::pm2("app")
    }
}

/// Attaches by spawning a log-following command and reading its pipes
pub struct ProcessLogSource {
    command: ProcessCommand,
}

impl ProcessLogSource {
    pub fn new(command: ProcessCommand) -> Self {
        Self { command }
    }

    fn spawn_reader<R>(reader: R, stream: StreamKind, tx: mpsc::Sender<SourceEvent>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        tokio::spawn(async move {
            let mut reader = BufReader::new(reader);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                let event = match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => SourceEvent::Line {
                        stream,
                        text: decode_line(&buf),
                    },
                    Err(e) => {
                        let _ = tx.send(SourceEvent::Failed(SourceError::Read(e))).await;
                        break;
                    }
                };
                if tx.send(event).await.is_err() {
                    // Attachment dropped
                    break;
                }
            }
        });
    }
}

/// Decode one raw output line, replacing invalid UTF-8 and dropping the terminator
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

#[async_trait]
impl LogSource for ProcessLogSource {
    async fn attach(&self) -> Result<Attachment, SourceError> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SourceError::Spawn {
                command: self.describe(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or(SourceError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(SourceError::MissingPipe("stderr"))?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        Self::spawn_reader(stdout, StreamKind::Stdout, tx.clone());
        Self::spawn_reader(stderr, StreamKind::Stderr, tx);

        Ok(Attachment::with_child(rx, child))
    }

    fn describe(&self) -> String {
        std::iter::once(self.command.program.as_str())
            .chain(self.command.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessLogSource {
        ProcessLogSource::new(ProcessCommand {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
        })
    }

    #[tokio::test]
    async fn test_reads_stdout_and_stderr_until_exit() {
        let source = sh("echo out-line; echo err-line 1>&2");
        let mut attachment = source.attach().await.unwrap();

        let mut seen = Vec::new();
        while let Some(event) = attachment.next().await {
            if let SourceEvent::Line { stream, text } = event {
                seen.push((stream, text));
            }
        }
        seen.sort_by(|a, b| a.1.cmp(&b.1));
        assert_eq!(
            seen,
            vec![
                (StreamKind::Stderr, "err-line".to_string()),
                (StreamKind::Stdout, "out-line".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_attach() {
        let source = ProcessLogSource::new(ProcessCommand {
            program: "definitely-not-a-real-binary-xyz".to_string(),
            args: vec![],
        });
        let err = source.attach().await.err().unwrap();
        assert!(matches!(err, SourceError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_end_attachment() {
        let source = sh("printf 'caf\\351 ok\\r\\nnext line\\n'");
        let mut attachment = source.attach().await.unwrap();

        let mut lines = Vec::new();
        while let Some(event) = attachment.next().await {
            match event {
                SourceEvent::Line { text, .. } => lines.push(text),
                SourceEvent::Failed(e) => panic!("unexpected failure: {e}"),
            }
        }
        assert_eq!(lines, vec!["caf\u{FFFD} ok".to_string(), "next line".to_string()]);
    }

    #[test]
    fn test_decode_line_strips_terminators() {
        assert_eq!(decode_line(b"plain\n"), "plain");
        assert_eq!(decode_line(b"crlf\r\n"), "crlf");
        assert_eq!(decode_line(b"no newline"), "no newline");
        assert_eq!(decode_line(b"bad \xff byte\n"), "bad \u{FFFD} byte");
    }

    #[test]
    fn test_describe_and_pm2_default() {
        let source = ProcessLogSource::new(ProcessCommand::pm2("api"));
        assert_eq!(source.describe(), "pm2 logs api --raw --lines 0");
    }
}
