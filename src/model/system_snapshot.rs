use super::ProcessInfo;
use crate::util;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Fields the backend reports in its key-value stat replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatField {
    CpuUsage,
    SystemTotalTicks,
    MemTotal,
    MemFree,
    MemAvailable,
    Buffers,
    Cached,
    SwapTotal,
    SwapFree,
    NetDown,
    NetUp,
    DiskUsed,
    DiskTotal,
}

impl StatField {
    pub const ALL: [StatField; 13] = [
        StatField::CpuUsage,
        StatField::SystemTotalTicks,
        StatField::MemTotal,
        StatField::MemFree,
        StatField::MemAvailable,
        StatField::Buffers,
        StatField::Cached,
        StatField::SwapTotal,
        StatField::SwapFree,
        StatField::NetDown,
        StatField::NetUp,
        StatField::DiskUsed,
        StatField::DiskTotal,
    ];
}

impl fmt::Display for StatField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// System-wide counters as reported by the backend, all memory figures in KB.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemSample {
    pub cpu_usage_percent: f64,
    pub system_total_ticks: u64,
    pub mem_total_kb: u64,
    pub mem_free_kb: u64,
    pub mem_available_kb: u64,
    pub buffers_kb: u64,
    pub cached_kb: u64,
    pub swap_total_kb: u64,
    pub swap_free_kb: u64,
    // Already per-second rates on the wire
    pub net_down_bytes_per_sec: u64,
    pub net_up_bytes_per_sec: u64,
    pub disk_used_kb: u64,
    pub disk_total_kb: u64,
    /// Fields that were missing or failed to parse this cycle.
    pub unavailable: Vec<StatField>,
}

impl SystemSample {
    pub fn is_available(&self, field: StatField) -> bool {
        !self.unavailable.contains(&field)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuInfo {
    pub usage_percent: f64,
    pub core_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total_kb: u64,
    pub free_kb: u64,
    pub available_kb: u64,
    pub used_kb: u64,
    pub buffers_kb: u64,
    pub cached_kb: u64,
    pub used_percent: f64,
    pub used_display: String,
    pub total_display: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwapInfo {
    pub total_kb: u64,
    pub used_kb: u64,
    pub used_percent: f64,
    pub used_display: String,
    pub total_display: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkInfo {
    pub down_bytes_per_sec: u64,
    pub up_bytes_per_sec: u64,
    pub down_display: String,
    pub up_display: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskInfo {
    pub used_kb: u64,
    pub total_kb: u64,
    pub used_percent: f64,
    pub used_display: String,
    pub total_display: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub cpu: CpuInfo,
    pub memory: MemoryInfo,
    pub swap: SwapInfo,
    pub network: NetworkInfo,
    pub disk: DiskInfo,
}

fn percent_of(part: u64, whole: u64) -> f64 {
    if whole > 0 {
        (part as f64 / whole as f64) * 100.0
    } else {
        0.0
    }
}

impl SystemInfo {
    /// Display figures derived from one system sample. `mem_total_kb` is the
    /// cached total, used when the sample itself lacks one.
    pub fn from_sample(sample: &SystemSample, mem_total_kb: u64, core_count: usize) -> Self {
        let total = if sample.mem_total_kb > 0 {
            sample.mem_total_kb
        } else {
            mem_total_kb
        };
        let used = total.saturating_sub(sample.mem_available_kb);
        let swap_used = sample.swap_total_kb.saturating_sub(sample.swap_free_kb);

        Self {
            cpu: CpuInfo {
                usage_percent: sample.cpu_usage_percent.max(0.0),
                core_count,
            },
            memory: MemoryInfo {
                total_kb: total,
                free_kb: sample.mem_free_kb,
                available_kb: sample.mem_available_kb,
                used_kb: used,
                buffers_kb: sample.buffers_kb,
                cached_kb: sample.cached_kb,
                used_percent: percent_of(used, total),
                used_display: util::format_kb(used),
                total_display: util::format_kb(total),
            },
            swap: SwapInfo {
                total_kb: sample.swap_total_kb,
                used_kb: swap_used,
                used_percent: percent_of(swap_used, sample.swap_total_kb),
                used_display: util::format_kb(swap_used),
                total_display: util::format_kb(sample.swap_total_kb),
            },
            network: NetworkInfo {
                down_bytes_per_sec: sample.net_down_bytes_per_sec,
                up_bytes_per_sec: sample.net_up_bytes_per_sec,
                down_display: util::format_rate(sample.net_down_bytes_per_sec),
                up_display: util::format_rate(sample.net_up_bytes_per_sec),
            },
            disk: DiskInfo {
                used_kb: sample.disk_used_kb,
                total_kb: sample.disk_total_kb,
                used_percent: percent_of(sample.disk_used_kb, sample.disk_total_kb),
                used_display: util::format_kb(sample.disk_used_kb),
                total_display: util::format_kb(sample.disk_total_kb),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortColumn {
    Cpu,
    Memory,
    Pid,
    Name,
}

impl FromStr for SortColumn {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(SortColumn::Cpu),
            "memory" | "mem" => Ok(SortColumn::Memory),
            "pid" => Ok(SortColumn::Pid),
            "name" | "command" => Ok(SortColumn::Name),
            other => Err(format!("unknown sort column '{}'", other)),
        }
    }
}

/// One published cycle: the process table and dashboard figures together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SystemSnapshot {
    pub cycle: u64,
    pub processes: Vec<ProcessInfo>,
    pub system: SystemInfo,
    pub process_count: usize,
    /// True when this is the last good data republished after a failed cycle.
    pub stale: bool,
    pub failure: Option<String>,
    pub unavailable: Vec<StatField>,
    pub malformed_records: usize,
    /// The process list ended without its end sentinel.
    pub truncated: bool,
    #[serde(skip)]
    pid_index: HashMap<i32, usize>,
}

impl SystemSnapshot {
    pub fn new(cycle: u64, processes: Vec<ProcessInfo>, system: SystemInfo) -> Self {
        let mut snapshot = Self {
            cycle,
            process_count: processes.len(),
            processes,
            system,
            ..Self::default()
        };
        snapshot.reindex();
        snapshot
    }

    /// Snapshot published when a cycle fails: the last good data, marked stale.
    pub fn failed(last_good: Option<&SystemSnapshot>, cycle: u64, reason: String) -> Self {
        let mut snapshot = last_good.cloned().unwrap_or_default();
        snapshot.cycle = cycle;
        snapshot.stale = true;
        snapshot.failure = Some(reason);
        if snapshot.pid_index.len() != snapshot.processes.len() {
            snapshot.reindex();
        }
        snapshot
    }

    pub fn is_ok(&self) -> bool {
        self.failure.is_none()
    }

    /// Looks a process up by pid, e.g. to restore a selection after refresh.
    pub fn process(&self, pid: i32) -> Option<&ProcessInfo> {
        self.position(pid).map(|i| &self.processes[i])
    }

    /// Row index of `pid`. `processes` is public, so an index entry is only
    /// trusted if the row it points at still carries that pid.
    pub fn position(&self, pid: i32) -> Option<usize> {
        match self.pid_index.get(&pid) {
            Some(&i) if self.processes.get(i).is_some_and(|p| p.pid == pid) => Some(i),
            _ => self.processes.iter().position(|p| p.pid == pid),
        }
    }

    pub fn sort_by(&mut self, column: SortColumn, ascending: bool) {
        self.processes.sort_by(|a, b| {
            let ord = match column {
                SortColumn::Cpu => a
                    .cpu_percent
                    .partial_cmp(&b.cpu_percent)
                    .unwrap_or(std::cmp::Ordering::Equal),
                SortColumn::Memory => a.memory_kb.cmp(&b.memory_kb),
                SortColumn::Pid => a.pid.cmp(&b.pid),
                SortColumn::Name => a.command.to_lowercase().cmp(&b.command.to_lowercase()),
            };
            let ord = if ascending { ord } else { ord.reverse() };
            ord.then_with(|| a.pid.cmp(&b.pid))
        });
        self.reindex();
    }

    pub fn total_cpu_percent(&self) -> f64 {
        self.processes.iter().map(|p| p.cpu_percent).sum()
    }

    fn reindex(&mut self) {
        self.pid_index = self
            .processes
            .iter()
            .enumerate()
            .map(|(i, p)| (p.pid, i))
            .collect();
    }
}
