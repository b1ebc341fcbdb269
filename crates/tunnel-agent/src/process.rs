use std::ffi::OsString;
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::Result;

/// Lines buffered between the pipe readers and the scanner.
const LINE_BUFFER: usize = 1024;

// ─── ClientCommand ────────────────────────────────────────────────────────

/// Program and arguments for the tunnel client.
#[derive(Debug, Clone)]
pub struct ClientCommand {
    pub program: OsString,
    pub args: Vec<OsString>,
}

impl ClientCommand {
    pub fn new<I, A>(program: impl Into<OsString>, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }
}

// ─── ClientProcess ────────────────────────────────────────────────────────

/// A running tunnel client whose stdout and stderr are merged into a single
/// line channel.
///
/// The channel closes once both pipes hit EOF, which in practice means the
/// client has exited. The child is killed if this value is dropped.
pub struct ClientProcess {
    pub child: Child,
    pub lines: mpsc::Receiver<String>,
}

impl ClientProcess {
    pub fn spawn(cmd: &ClientCommand) -> Result<Self> {
        let mut child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let (tx, lines) = mpsc::channel(LINE_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx));
        }

        Ok(Self { child, lines })
    }
}

/// Forward every line of `reader` into `tx` until EOF.
///
/// Bytes are decoded lossily so one bad byte in the client's output does not
/// end the stream.
pub async fn forward_lines<R>(reader: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                while matches!(buf.last(), Some(b'\n' | b'\r')) {
                    buf.pop();
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                if tx.send(line).await.is_err() {
                    // Scanner is gone.
                    break;
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "tunnel client pipe read failed");
                break;
            }
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────
