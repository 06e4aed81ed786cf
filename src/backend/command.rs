use crate::backend::collector::CollectorHandle;
use crate::backend::protocol::{self, Command};
use crate::backend::transport::Transport;
use crate::error::{Error, Result};
use nix::sys::signal::Signal;
use std::io;
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminateOutcome {
    Sent { pid: i32, signal: i32 },
    Failed { pid: i32, signal: i32, reason: String },
}

impl TerminateOutcome {
    pub fn success(&self) -> bool {
        matches!(self, TerminateOutcome::Sent { .. })
    }

    pub fn pid(&self) -> i32 {
        match self {
            TerminateOutcome::Sent { pid, .. } | TerminateOutcome::Failed { pid, .. } => *pid,
        }
    }
}

/// One-shot control requests, each on its own connection, independent of
/// the poll loop.
pub struct CommandClient<T: Transport> {
    transport: Arc<T>,
    protect_critical: bool,
}

impl<T: Transport> Clone for CommandClient<T> {
    fn clone(&self) -> Self {
        Self {
            transport: self.transport.clone(),
            protect_critical: self.protect_critical,
        }
    }
}

impl<T: Transport + 'static> CommandClient<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            protect_critical: true,
        }
    }

    pub fn protect_critical(mut self, protect: bool) -> Self {
        self.protect_critical = protect;
        self
    }

    /// Asks the backend to signal `pid`. Local validation failures never
    /// reach the backend.
    pub fn try_terminate(&self, pid: i32, signal: i32) -> Result<()> {
        let sig = Signal::try_from(signal).map_err(|_| Error::InvalidSignal(signal))?;
        if pid <= 0 {
            return Err(Error::InvalidPid(pid));
        }
        if self.protect_critical && is_critical_process(pid) {
            return Err(Error::CriticalProcess(pid));
        }

        let reply = self.transport.send(&Command::Kill { pid, signal })?;
        protocol::decode_ack(&reply)?;
        log::info!("Backend sent {:?} to PID {}", sig, pid);
        Ok(())
    }

    /// True only when the backend acknowledged with `OK`.
    pub fn terminate(&self, pid: i32, signal: i32) -> bool {
        match self.try_terminate(pid, signal) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to send signal {} to PID {}: {}", signal, pid, e);
                false
            }
        }
    }

    /// Runs the request on a short-lived thread and reports back over a
    /// channel. A successful termination asks the collector for an
    /// immediate refresh.
    pub fn spawn_terminate(
        &self,
        pid: i32,
        signal: i32,
        collector: Option<CollectorHandle>,
    ) -> io::Result<flume::Receiver<TerminateOutcome>> {
        let (tx, rx) = flume::bounded(1);
        let client = self.clone();

        thread::Builder::new()
            .name(format!("terminate-{}", pid))
            .spawn(move || {
                let outcome = match client.try_terminate(pid, signal) {
                    Ok(()) => {
                        if let Some(collector) = collector {
                            collector.refresh();
                        }
                        TerminateOutcome::Sent { pid, signal }
                    }
                    Err(e) => {
                        log::error!("Failed to send signal {} to PID {}: {}", signal, pid, e);
                        TerminateOutcome::Failed {
                            pid,
                            signal,
                            reason: e.to_string(),
                        }
                    }
                };
                let _ = tx.send(outcome);
            })?;

        Ok(rx)
    }
}

/// PID 1 (init/systemd) and PID 2 (kthreadd).
fn is_critical_process(pid: i32) -> bool {
    pid <= 2
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    struct Backend {
        reply: String,
        sent: Mutex<Vec<String>>,
    }

    impl Backend {
        fn replying(reply: &str) -> Arc<Self> {
            Arc::new(Self {
                reply: reply.to_string(),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    impl Transport for Backend {
        fn send(&self, command: &Command) -> Result<String> {
            self.sent.lock().unwrap().push(command.encode());
            Ok(self.reply.clone())
        }
    }

    struct Unreachable;

    impl Transport for Unreachable {
        fn send(&self, _command: &Command) -> Result<String> {
            Err(Error::Connection {
                path: "/tmp/SysMon".into(),
                source: io::Error::new(io::ErrorKind::NotFound, "no socket"),
            })
        }
    }

    #[test]
    fn ok_reply_is_success() {
        let backend = Backend::replying("OK\n");
        let client = CommandClient::new(backend.clone());
        assert!(client.terminate(1234, 15));
        assert_eq!(backend.sent.lock().unwrap().as_slice(), ["KILL;1234;15\n"]);
    }

    #[test]
    fn error_reply_is_failure() {
        let client = CommandClient::new(Backend::replying("ERROR;no such process\n"));
        assert!(!client.terminate(1234, 15));
        assert!(matches!(
            client.try_terminate(1234, 15),
            Err(Error::CommandRejected(reason)) if reason == "no such process"
        ));
    }

    #[test]
    fn transport_failure_is_failure() {
        let client = CommandClient::new(Arc::new(Unreachable));
        assert!(!client.terminate(1234, 9));
    }

    #[test]
    fn invalid_requests_never_reach_backend() {
        let backend = Backend::replying("OK\n");
        let client = CommandClient::new(backend.clone());
        assert!(matches!(client.try_terminate(1234, 0), Err(Error::InvalidSignal(0))));
        assert!(matches!(client.try_terminate(1234, 999), Err(Error::InvalidSignal(999))));
        assert!(matches!(client.try_terminate(-1, 15), Err(Error::InvalidPid(-1))));
        assert!(matches!(client.try_terminate(1, 9), Err(Error::CriticalProcess(1))));
        assert!(backend.sent.lock().unwrap().is_empty());

        let unguarded = CommandClient::new(backend.clone()).protect_critical(false);
        assert!(unguarded.terminate(1, 15));
    }

    #[test]
    fn spawned_request_reports_outcome() {
        let client = CommandClient::new(Backend::replying("ERROR;kill failed\n"));
        let rx = client.spawn_terminate(4321, 15, None).unwrap();
        let outcome = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(!outcome.success());
        assert_eq!(outcome.pid(), 4321);
    }
}
