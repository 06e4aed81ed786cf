use serde::{Deserialize, Serialize};

/// One process record as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessSample {
    pub pid: i32,
    pub ppid: i32,
    pub user: String,
    pub state: String,
    pub command: String,
    // Cumulative, only deltas between cycles mean anything
    pub cpu_time_ticks: u64,
    pub resident_memory_kb: u64,
}

impl Default for ProcessSample {
    fn default() -> Self {
        Self {
            pid: 0,
            ppid: 0,
            user: String::new(),
            state: String::from("?"),
            command: String::new(),
            cpu_time_ticks: 0,
            resident_memory_kb: 0,
        }
    }
}

/// A process row ready for display: the raw sample plus derived rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: i32,
    pub ppid: i32,
    pub user: String,
    pub state: String,
    pub command: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub memory_kb: u64,
    pub memory_display: String,
    pub total_cpu_time: u64,
    pub prev_cpu_time: u64,
}

impl ProcessInfo {
    pub fn from_sample(sample: ProcessSample, prev_cpu_time: u64) -> Self {
        Self {
            pid: sample.pid,
            ppid: sample.ppid,
            user: sample.user,
            state: sample.state,
            command: sample.command,
            cpu_percent: 0.0,
            memory_percent: 0.0,
            memory_kb: sample.resident_memory_kb,
            memory_display: crate::util::format_kb(sample.resident_memory_kb),
            total_cpu_time: sample.cpu_time_ticks,
            prev_cpu_time,
        }
    }
}
