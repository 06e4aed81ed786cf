use crate::model::{ProcessInfo, ProcessSample, StatField, SystemInfo, SystemSample};
use std::collections::HashMap;

/// Counters carried from one successful cycle to the next.
///
/// Only the metrics engine produces new states; the collector swaps its copy
/// in after a cycle succeeds, so a failed cycle leaves it untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollState {
    prev_total_cpu: u64,
    prev_processes: HashMap<i32, u64>, // pid -> cpu ticks
    total_memory_kb: u64,
}

impl PollState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prev_total_cpu(&self) -> u64 {
        self.prev_total_cpu
    }

    pub fn prev_cpu_time(&self, pid: i32) -> Option<u64> {
        self.prev_processes.get(&pid).copied()
    }

    pub fn tracked_pids(&self) -> usize {
        self.prev_processes.len()
    }

    pub fn total_memory_kb(&self) -> u64 {
        self.total_memory_kb
    }
}

/// Everything recomputed for one cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DerivedMetrics {
    pub processes: Vec<ProcessInfo>,
    pub system: SystemInfo,
}

/// Turns raw cumulative counters into per-cycle rates.
#[derive(Debug, Clone)]
pub struct MetricsEngine {
    core_count: usize,
}

impl MetricsEngine {
    pub fn new(core_count: usize) -> Self {
        Self {
            core_count: core_count.max(1),
        }
    }

    pub fn core_count(&self) -> usize {
        self.core_count
    }

    pub fn update(
        &self,
        processes: Vec<ProcessSample>,
        system: &SystemSample,
        state: &PollState,
    ) -> (DerivedMetrics, PollState) {
        let total_cpu = system.system_total_ticks;
        // No baseline yet: report zero rather than a rate since boot.
        let delta_total = if state.prev_total_cpu == 0 {
            0
        } else {
            total_cpu.saturating_sub(state.prev_total_cpu)
        };

        let total_memory_kb = if system.is_available(StatField::MemTotal) && system.mem_total_kb > 0 {
            system.mem_total_kb
        } else {
            state.total_memory_kb
        };

        let mut prev_processes = HashMap::with_capacity(processes.len());
        let mut rows = Vec::with_capacity(processes.len());

        for sample in processes {
            let pid = sample.pid;
            let ticks = sample.cpu_time_ticks;
            let memory_kb = sample.resident_memory_kb;
            // A pid we have not seen is its own baseline.
            let prev_cpu = state.prev_processes.get(&pid).copied().unwrap_or(ticks);
            let cpu_delta = ticks.saturating_sub(prev_cpu);

            let mut info = ProcessInfo::from_sample(sample, prev_cpu);
            info.cpu_percent = if delta_total > 0 {
                (cpu_delta as f64 / delta_total as f64) * 100.0 * self.core_count as f64
            } else {
                0.0
            };
            info.memory_percent = if total_memory_kb > 0 {
                (memory_kb as f64 / total_memory_kb as f64) * 100.0
            } else {
                0.0
            };

            prev_processes.insert(pid, ticks);
            rows.push(info);
        }

        let next = PollState {
            prev_total_cpu: total_cpu,
            prev_processes,
            total_memory_kb,
        };

        let derived = DerivedMetrics {
            processes: rows,
            system: SystemInfo::from_sample(system, total_memory_kb, self.core_count),
        };

        (derived, next)
    }
}
