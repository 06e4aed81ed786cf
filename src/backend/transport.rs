use crate::backend::protocol::Command;
use crate::error::{Error, Result};
use std::io::{self, ErrorKind, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

const READ_CHUNK: usize = 8192;

/// Request/response channel to the backend.
pub trait Transport: Send + Sync {
    /// Sends one command and returns the raw reply text.
    fn send(&self, command: &Command) -> Result<String>;
}

/// Opens a fresh connection to the backend socket for every request.
#[derive(Debug, Clone)]
pub struct UnixTransport {
    socket_path: PathBuf,
    read_timeout: Duration,
    write_timeout: Duration,
}

impl UnixTransport {
    pub fn new(socket_path: impl Into<PathBuf>, read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            read_timeout,
            write_timeout,
        }
    }

    pub fn from_config(config: &crate::config::Config) -> Self {
        Self::new(
            config.socket_path.clone(),
            config.read_timeout(),
            config.write_timeout(),
        )
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn connect(&self) -> Result<UnixStream> {
        let stream = UnixStream::connect(&self.socket_path).map_err(|source| Error::Connection {
            path: self.socket_path.clone(),
            source,
        })?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        stream.set_write_timeout(Some(self.write_timeout))?;
        Ok(stream)
    }
}

impl Transport for UnixTransport {
    fn send(&self, command: &Command) -> Result<String> {
        let mut stream = self.connect()?;
        let line = command.encode();
        log::debug!("-> {}", line.trim_end());

        stream.write_all(line.as_bytes())?;
        // The backend serves many commands per connection; closing our side
        // lets it see EOF and hang up once it has replied.
        if let Err(e) = stream.shutdown(Shutdown::Write) {
            log::debug!("Half-close failed on {}: {}", self.socket_path.display(), e);
        }

        let reply = read_reply(&mut stream, command, self.read_timeout)?;
        log::debug!("<- {} ({} bytes)", command.name(), reply.len());
        Ok(reply)
    }
}

/// A reply source whose per-read timeout can be tightened as the overall
/// deadline approaches.
pub(crate) trait ReplyRead: Read {
    fn limit_read(&mut self, remaining: Duration) -> io::Result<()>;
}

impl ReplyRead for UnixStream {
    fn limit_read(&mut self, remaining: Duration) -> io::Result<()> {
        self.set_read_timeout(Some(remaining))
    }
}

/// Accumulates bytes until the command's terminator shows up, the peer
/// closes, or the deadline passes. No single read may outlast the deadline.
pub(crate) fn read_reply<R: ReplyRead>(reader: &mut R, command: &Command, timeout: Duration) -> Result<String> {
    let terminator = command.terminator();
    let deadline = Instant::now() + timeout;
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return timed_out(buf, command, timeout);
        }
        reader.limit_read(remaining)?;

        match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
                let scanned = buf.len();
                buf.extend_from_slice(&chunk[..n]);
                if let Some(term) = terminator {
                    // Only the new bytes plus enough overlap for a split marker.
                    let from = scanned.saturating_sub(term.len().saturating_sub(1));
                    if contains(&buf[from..], term.as_bytes()) {
                        break;
                    }
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return timed_out(buf, command, timeout);
            }
            Err(e) => return Err(Error::Io(e)),
        }
    }

    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn timed_out(buf: Vec<u8>, command: &Command, timeout: Duration) -> Result<String> {
    // Replies without a terminator are only delimited by the peer going quiet.
    if command.terminator().is_none() && !buf.is_empty() {
        return Ok(String::from_utf8_lossy(&buf).into_owned());
    }
    Err(Error::Timeout {
        command: command.name().to_string(),
        after: timeout,
    })
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    !needle.is_empty() && haystack.windows(needle.len()).any(|w| w == needle)
}
