//! DAP transport layer: Content-Length framing over a byte stream.
//!
//! A [`Transport`] is a blocking read half plus a write half. The read
//! half is consumed on a dedicated OS thread that hands parsed messages to
//! the async side over a channel; nothing else ever touches it.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::process::{Child, ChildStdin};
use std::thread;

use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::DapError;

const HEADER: &str = "Content-Length: ";
const SEPARATOR: &[u8] = b"\r\n\r\n";

/// Encode a JSON value into a DAP wire-format message with Content-Length header.
pub fn encode_message(value: &Value) -> Vec<u8> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let header = format!("{HEADER}{}\r\n\r\n", body.len());
    let mut buf = Vec::with_capacity(header.len() + body.len());
    buf.extend_from_slice(header.as_bytes());
    buf.extend_from_slice(&body);
    buf
}

/// Decode one DAP wire-format message from the front of a byte buffer.
///
/// Returns the parsed JSON value and the number of bytes consumed. An
/// incomplete buffer yields a `Transport` error; callers holding a growing
/// buffer retry once more bytes arrive.
pub fn decode_message(data: &[u8]) -> Result<(Value, usize), DapError> {
    let sep_pos = data
        .windows(SEPARATOR.len())
        .position(|w| w == SEPARATOR)
        .ok_or_else(|| DapError::Transport("incomplete header: missing \\r\\n\\r\\n".into()))?;

    let header = std::str::from_utf8(&data[..sep_pos])
        .map_err(|e| DapError::Transport(format!("invalid UTF-8 in header: {e}")))?;
    let content_length = parse_content_length(header)?;

    let body_start = sep_pos + SEPARATOR.len();
    let total = body_start + content_length;
    if data.len() < total {
        return Err(DapError::Transport(format!(
            "incomplete body: expected {content_length} bytes, have {}",
            data.len() - body_start
        )));
    }

    let value = serde_json::from_slice(&data[body_start..total])
        .map_err(|e| DapError::InvalidResponse(format!("JSON parse error: {e}")))?;
    Ok((value, total))
}

fn parse_content_length(header: &str) -> Result<usize, DapError> {
    for line in header.split("\r\n") {
        if let Some(value) = line.trim().strip_prefix(HEADER.trim_end()) {
            let value = value.trim();
            return value.parse::<usize>().map_err(|e| {
                DapError::Transport(format!("invalid Content-Length value '{value}': {e}"))
            });
        }
    }
    Err(DapError::Transport("missing Content-Length header".into()))
}

/// Blocking read half of a transport.
pub trait TransportRead: Send {
    /// Read up to and including the next `\n`. EOF is an error.
    fn read_line(&mut self) -> io::Result<Vec<u8>>;
    /// Read at most `n` bytes. May return fewer; EOF is an error.
    fn read(&mut self, n: usize) -> io::Result<Vec<u8>>;
}

impl<R: BufRead + Send> TransportRead for R {
    fn read_line(&mut self) -> io::Result<Vec<u8>> {
        let mut line = Vec::new();
        if self.read_until(b'\n', &mut line)? == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream"));
        }
        Ok(line)
    }

    fn read(&mut self, n: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0; n];
        let read = Read::read(self, &mut buf)?;
        if read == 0 && n > 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "end of stream"));
        }
        buf.truncate(read);
        Ok(buf)
    }
}

/// Write half of a transport.
pub trait TransportWrite: Send {
    /// Write one fully framed message.
    fn write(&mut self, message: &[u8]) -> io::Result<()>;
    /// Release the underlying resource. Unblocks the reader where possible.
    fn dispose(&mut self) {}
}

/// Writer over any `Write` stream; disposing drops the stream.
pub struct StreamWriter<W: Write + Send> {
    inner: Option<W>,
}

impl<W: Write + Send> StreamWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner: Some(inner) }
    }
}

impl<W: Write + Send> TransportWrite for StreamWriter<W> {
    fn write(&mut self, message: &[u8]) -> io::Result<()> {
        let inner = self
            .inner
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "transport disposed"))?;
        inner.write_all(message)?;
        inner.flush()
    }

    fn dispose(&mut self) {
        self.inner = None;
    }
}

/// Writer for an adapter child process; disposing kills the process.
struct ProcessWriter {
    stdin: Option<ChildStdin>,
    child: Child,
}

impl TransportWrite for ProcessWriter {
    fn write(&mut self, message: &[u8]) -> io::Result<()> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "transport disposed"))?;
        stdin.write_all(message)?;
        stdin.flush()
    }

    fn dispose(&mut self) {
        self.stdin = None;
        if let Err(e) = self.child.kill() {
            tracing::debug!("adapter process already exited: {}", e);
        }
        let _ = self.child.try_wait();
    }
}

/// Writer for a socket connection; disposing shuts the socket down.
struct SocketWriter {
    stream: TcpStream,
}

impl TransportWrite for SocketWriter {
    fn write(&mut self, message: &[u8]) -> io::Result<()> {
        self.stream.write_all(message)?;
        self.stream.flush()
    }

    fn dispose(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// A byte channel to one debug adapter.
pub struct Transport {
    reader: Box<dyn TransportRead>,
    writer: Box<dyn TransportWrite>,
}

impl Transport {
    /// Build a transport from explicit halves.
    pub fn new(reader: impl TransportRead + 'static, writer: impl TransportWrite + 'static) -> Self {
        Self {
            reader: Box::new(reader),
            writer: Box::new(writer),
        }
    }

    /// Build a transport over plain read/write streams.
    pub fn from_streams<R, W>(reader: R, writer: W) -> Self
    where
        R: Read + Send + 'static,
        W: Write + Send + 'static,
    {
        Self::new(BufReader::new(reader), StreamWriter::new(writer))
    }

    /// Talk to an adapter over the stdio of a spawned child process.
    ///
    /// The child must have been spawned with piped stdin and stdout.
    pub fn from_child(mut child: Child) -> Result<Self, DapError> {
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| DapError::AdapterStart("could not capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DapError::AdapterStart("could not capture stdout".into()))?;
        Ok(Self::new(
            BufReader::new(stdout),
            ProcessWriter {
                stdin: Some(stdin),
                child,
            },
        ))
    }

    /// Talk to an adapter listening on a socket.
    pub fn connect_tcp(addr: impl ToSocketAddrs) -> Result<Self, DapError> {
        let stream = TcpStream::connect(addr).map_err(|e| DapError::AdapterStart(e.to_string()))?;
        let read_half = stream
            .try_clone()
            .map_err(|e| DapError::AdapterStart(e.to_string()))?;
        Ok(Self::new(BufReader::new(read_half), SocketWriter { stream }))
    }

    pub(crate) fn into_parts(self) -> (Box<dyn TransportRead>, Box<dyn TransportWrite>) {
        (self.reader, self.writer)
    }
}

/// Read one message, blocking until it is complete.
///
/// Lines that are not a `Content-Length` header and bodies that are not
/// JSON are logged and skipped. A bad length, a missing separator, or a
/// read failure ends the stream.
pub fn read_message(reader: &mut dyn TransportRead) -> Result<Value, DapError> {
    let closed = |e: io::Error| DapError::Transport(e.to_string());
    loop {
        let line = reader.read_line().map_err(closed)?;
        let line = String::from_utf8_lossy(&line);
        let Some(size) = line.strip_prefix(HEADER) else {
            tracing::error!("!! invalid header: {:?}", line.trim_end());
            continue;
        };
        let size = size.trim();
        let size: usize = size
            .parse()
            .map_err(|_| DapError::Transport(format!("invalid Content-Length value '{size}'")))?;

        let separator = reader.read_line().map_err(closed)?;
        if separator != b"\r\n" {
            return Err(DapError::Transport("expected \\r\\n after header".into()));
        }

        let mut body = Vec::with_capacity(size);
        while body.len() < size {
            let chunk = reader.read(size - body.len()).map_err(closed)?;
            body.extend_from_slice(&chunk);
        }

        match serde_json::from_slice(&body) {
            Ok(value) => return Ok(value),
            Err(e) => {
                tracing::error!("!! discarding malformed message body: {}", e);
            }
        }
    }
}

/// What the reader thread hands to the client.
#[derive(Debug)]
pub(crate) enum Incoming {
    Message(Value),
    Closed(String),
}

/// Start the blocking reader thread for `reader`.
pub(crate) fn spawn_reader(
    mut reader: Box<dyn TransportRead>,
    tx: mpsc::UnboundedSender<Incoming>,
) -> Result<(), DapError> {
    thread::Builder::new()
        .name("dap-reader".into())
        .spawn(move || loop {
            match read_message(reader.as_mut()) {
                Ok(value) => {
                    if tx.send(Incoming::Message(value)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::info!("transport closed: {}", e);
                    let _ = tx.send(Incoming::Closed(e.to_string()));
                    break;
                }
            }
        })
        .map_err(|e| DapError::Transport(format!("failed to start reader thread: {e}")))?;
    Ok(())
}
