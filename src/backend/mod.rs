mod collector;
mod command;
pub mod export;
mod metrics;
pub mod protocol;
mod transport;

pub use collector::{Collector, CollectorHandle, Control};
pub use command::{CommandClient, TerminateOutcome};
pub use metrics::{DerivedMetrics, MetricsEngine, PollState};
pub use protocol::Command;
pub use transport::{Transport, UnixTransport};
