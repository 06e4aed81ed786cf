use crate::backend::metrics::{MetricsEngine, PollState};
use crate::backend::protocol::{self, Command, ProcessList};
use crate::backend::transport::Transport;
use crate::error::{Error, Result};
use crate::model::{SystemSample, SystemSnapshot};
use flume::{RecvTimeoutError, TrySendError};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Pause,
    Resume,
    Toggle,
    /// Poll now, outside the regular schedule.
    Refresh,
    Shutdown,
}

/// Steers a running collector from any thread.
#[derive(Debug, Clone)]
pub struct CollectorHandle {
    tx: flume::Sender<Control>,
    paused: Arc<AtomicBool>,
}

impl CollectorHandle {
    pub fn pause(&self) {
        self.send(Control::Pause);
    }

    pub fn resume(&self) {
        self.send(Control::Resume);
    }

    pub fn toggle(&self) {
        self.send(Control::Toggle);
    }

    pub fn refresh(&self) {
        self.send(Control::Refresh);
    }

    pub fn shutdown(&self) {
        self.send(Control::Shutdown);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    fn send(&self, control: Control) {
        if self.tx.send(control).is_err() {
            log::debug!("Collector already stopped, dropping {:?}", control);
        }
    }
}

/// The poll loop: acquire, decode, derive, publish, once per interval.
///
/// Cycles run one after another on the collector thread, so a new cycle
/// never starts while the previous one is still in flight.
pub struct Collector<T: Transport> {
    transport: Arc<T>,
    engine: MetricsEngine,
    interval: Duration,
    state: PollState,
    cycle: u64,
    last_good: Option<SystemSnapshot>,
    tx: flume::Sender<SystemSnapshot>,
    // Lets the collector evict an unread snapshot instead of blocking.
    mailbox: flume::Receiver<SystemSnapshot>,
    control: flume::Receiver<Control>,
    control_open: bool,
    paused: Arc<AtomicBool>,
}

impl<T: Transport + 'static> Collector<T> {
    pub fn new(
        transport: Arc<T>,
        engine: MetricsEngine,
        interval: Duration,
    ) -> (Self, CollectorHandle, flume::Receiver<SystemSnapshot>) {
        let (tx, rx) = flume::bounded(1);
        let (control_tx, control_rx) = flume::unbounded();
        let paused = Arc::new(AtomicBool::new(false));

        let collector = Self {
            transport,
            engine,
            interval,
            state: PollState::new(),
            cycle: 0,
            last_good: None,
            tx,
            mailbox: rx.clone(),
            control: control_rx,
            control_open: true,
            paused: paused.clone(),
        };
        let handle = CollectorHandle {
            tx: control_tx,
            paused,
        };
        (collector, handle, rx)
    }

    pub fn start(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("collector".into())
            .spawn(move || {
                self.run();
            })
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    fn run(mut self) {
        log::info!(
            "Collector started, polling every {} ms",
            self.interval.as_millis()
        );
        let mut next_tick = Instant::now();

        loop {
            let paused = self.paused.load(Ordering::SeqCst);
            let deadline = if paused { None } else { Some(next_tick) };

            let mut refresh = false;
            match self.wait(deadline) {
                None => {
                    if paused {
                        log::info!("Collector paused with no handle left, shutting down");
                        break;
                    }
                    refresh = true;
                    next_tick += self.interval;
                    let now = Instant::now();
                    if next_tick < now {
                        // Overran the period; skip missed ticks rather than bursting.
                        next_tick = now + self.interval;
                    }
                }
                Some(first) => {
                    let batch: Vec<Control> =
                        std::iter::once(first).chain(self.control.try_iter()).collect();
                    if batch.contains(&Control::Shutdown) {
                        break;
                    }
                    for control in batch {
                        match control {
                            Control::Pause => {
                                self.set_paused(true);
                            }
                            Control::Resume => {
                                if self.set_paused(false) {
                                    next_tick = Instant::now();
                                }
                            }
                            Control::Toggle => {
                                let now_paused = !self.paused.load(Ordering::SeqCst);
                                self.set_paused(now_paused);
                                if !now_paused {
                                    next_tick = Instant::now();
                                }
                            }
                            Control::Refresh => refresh = true,
                            Control::Shutdown => {}
                        }
                    }
                }
            }

            if refresh {
                let snapshot = self.poll_once();
                if !self.publish(snapshot) {
                    log::info!("Snapshot receiver dropped, shutting down collector");
                    break;
                }
            }
        }

        log::info!("Collector stopped after {} cycles", self.cycle);
    }

    /// Blocks until a control message arrives or the deadline passes
    /// (`None` return).
    fn wait(&mut self, deadline: Option<Instant>) -> Option<Control> {
        if !self.control_open {
            if let Some(deadline) = deadline {
                thread::sleep(deadline.saturating_duration_since(Instant::now()));
            }
            return None;
        }

        let result = match deadline {
            Some(deadline) => self.control.recv_deadline(deadline),
            None => self.control.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match result {
            Ok(control) => Some(control),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                log::debug!("All collector handles dropped");
                self.control_open = false;
                self.wait(deadline)
            }
        }
    }

    /// Returns whether the pause state changed.
    fn set_paused(&self, paused: bool) -> bool {
        let was = self.paused.swap(paused, Ordering::SeqCst);
        if was != paused {
            log::info!("Collector {}", if paused { "paused" } else { "resumed" });
        }
        was != paused
    }

    /// Runs one full cycle and returns the snapshot to publish.
    ///
    /// On failure the poll state is left exactly as it was and the last good
    /// snapshot is returned marked stale.
    pub fn poll_once(&mut self) -> SystemSnapshot {
        self.cycle += 1;
        let started = Instant::now();

        match self.acquire() {
            Ok((list, system)) => {
                let malformed = list.malformed;
                let truncated = !list.complete;
                let (derived, next) = self.engine.update(list.processes, &system, &self.state);
                self.state = next;

                let mut snapshot = SystemSnapshot::new(self.cycle, derived.processes, derived.system);
                snapshot.unavailable = system.unavailable;
                snapshot.malformed_records = malformed;
                snapshot.truncated = truncated;

                log::debug!(
                    "Cycle {}: {} processes in {:?}",
                    self.cycle,
                    snapshot.process_count,
                    started.elapsed()
                );
                self.last_good = Some(snapshot.clone());
                snapshot
            }
            Err(e) => {
                log::warn!("Poll cycle {} failed: {}", self.cycle, e);
                SystemSnapshot::failed(self.last_good.as_ref(), self.cycle, e.to_string())
            }
        }
    }

    fn acquire(&self) -> Result<(ProcessList, SystemSample)> {
        let transport = self.transport.as_ref();

        // Process list and stats go over separate connections in parallel.
        let (processes, stats) = thread::scope(|s| {
            let processes = s.spawn(|| transport.send(&Command::GetProcesses));
            let stats: Vec<Result<(Command, String)>> = Command::SYSTEM_STATS
                .iter()
                .map(|&command| transport.send(&command).map(|reply| (command, reply)))
                .collect();
            (processes.join(), stats)
        });

        let raw = processes
            .map_err(|_| Error::Io(io::Error::other("process list query panicked")))??;
        let mut replies = Vec::with_capacity(stats.len());
        for reply in stats {
            replies.push(reply?);
        }

        let list = protocol::decode_process_list(&raw)?;
        let system = protocol::decode_system_stats(
            replies.iter().map(|(command, reply)| (*command, reply.as_str())),
        );
        if !system.unavailable.is_empty() {
            log::debug!("Unavailable stats this cycle: {:?}", system.unavailable);
        }
        Ok((list, system))
    }

    /// Hands the snapshot over, replacing one the consumer has not taken yet.
    /// Returns false once the consumer is gone.
    fn publish(&self, snapshot: SystemSnapshot) -> bool {
        if self.tx.receiver_count() <= 1 {
            return false;
        }
        match self.tx.try_send(snapshot) {
            Ok(()) => true,
            Err(TrySendError::Full(snapshot)) => {
                let _ = self.mailbox.try_recv();
                let _ = self.tx.try_send(snapshot);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}
