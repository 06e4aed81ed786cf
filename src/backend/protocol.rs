use crate::error::{Error, Result};
use crate::model::{ProcessSample, StatField, SystemSample};
use std::collections::HashSet;

pub const BEGIN_PROCESS_LIST: &str = "BEGIN_PROCESS_LIST";
pub const END_PROCESS_LIST: &str = "END_PROCESS_LIST";
pub const ACK_OK: &str = "OK";
pub const ACK_ERROR: &str = "ERROR";

/// pid, ppid, user, state, command, cpuTicks, rssKb
pub const MIN_PROCESS_FIELDS: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    GetProcesses,
    GetCpuStats,
    GetMemStats,
    GetNetStats,
    GetDiskStats,
    Kill { pid: i32, signal: i32 },
}

impl Command {
    pub const SYSTEM_STATS: [Command; 4] = [
        Command::GetCpuStats,
        Command::GetMemStats,
        Command::GetNetStats,
        Command::GetDiskStats,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Command::GetProcesses => "GET_PROCESSES",
            Command::GetCpuStats => "GET_CPU_STATS",
            Command::GetMemStats => "GET_MEM_STATS",
            Command::GetNetStats => "GET_NET_STATS",
            Command::GetDiskStats => "GET_DISK_STATS",
            Command::Kill { .. } => "KILL",
        }
    }

    /// The newline-terminated request line.
    pub fn encode(&self) -> String {
        match self {
            Command::Kill { pid, signal } => format!("KILL;{};{}\n", pid, signal),
            other => format!("{}\n", other.name()),
        }
    }

    /// Keys a stat reply to this command may carry. The first line of the
    /// reply must use one of them.
    pub fn stat_keys(&self) -> &'static [&'static str] {
        match self {
            Command::GetCpuStats => &["CPU"],
            Command::GetMemStats => &[
                "MEM_TOTAL",
                "MEM_FREE",
                "MEM_AVAIL",
                "BUFFERS",
                "CACHED",
                "SWAP_TOTAL",
                "SWAP_FREE",
            ],
            Command::GetNetStats => &["NET"],
            Command::GetDiskStats => &["DISK"],
            Command::GetProcesses | Command::Kill { .. } => &[],
        }
    }

    /// Marker that ends a complete reply, if the reply has one.
    pub fn terminator(&self) -> Option<&'static str> {
        match self {
            Command::GetProcesses => Some(END_PROCESS_LIST),
            Command::GetMemStats => None,
            _ => Some("\n"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessList {
    pub processes: Vec<ProcessSample>,
    pub malformed: usize,
    /// Whether the end sentinel was seen.
    pub complete: bool,
}

/// Decodes a `GET_PROCESSES` reply. Bad records are skipped; a reply cut
/// off before the end sentinel yields the records received so far.
pub fn decode_process_list(raw: &str) -> Result<ProcessList> {
    let mut lines = raw.lines().map(str::trim_end).skip_while(|l| l.trim().is_empty());

    match lines.next() {
        Some(first) if first.trim() == BEGIN_PROCESS_LIST => {}
        _ => return Err(Error::unexpected(Command::GetProcesses.name(), preview(raw))),
    }

    let mut list = ProcessList::default();
    let mut seen = HashSet::new();

    for line in lines {
        if line.trim() == END_PROCESS_LIST {
            list.complete = true;
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        match parse_process_line(line) {
            Ok(sample) => {
                if seen.insert(sample.pid) {
                    list.processes.push(sample);
                } else {
                    log::warn!("Duplicate pid {} in process list, keeping first", sample.pid);
                    list.malformed += 1;
                }
            }
            Err(e) => {
                log::warn!("Skipping process record: {}", e);
                list.malformed += 1;
            }
        }
    }

    if !list.complete {
        log::warn!(
            "Process list ended without {} after {} records",
            END_PROCESS_LIST,
            list.processes.len()
        );
    }

    Ok(list)
}

fn parse_process_line(line: &str) -> Result<ProcessSample> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() < MIN_PROCESS_FIELDS {
        return Err(Error::malformed(
            line,
            format!("expected {} fields, got {}", MIN_PROCESS_FIELDS, fields.len()),
        ));
    }

    // A tab inside the command name shifts only the middle of the record.
    let n = fields.len();
    let command = fields[4..n - 2].join("\t");

    Ok(ProcessSample {
        pid: parse_field(line, "pid", fields[0])?,
        ppid: parse_field(line, "ppid", fields[1])?,
        user: fields[2].trim().to_string(),
        state: fields[3].trim().to_string(),
        command: command.trim().to_string(),
        cpu_time_ticks: parse_field(line, "cpuTicks", fields[n - 2])?,
        resident_memory_kb: parse_field(line, "rssKb", fields[n - 1])?,
    })
}

fn parse_field<T: std::str::FromStr>(line: &str, name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::malformed(line, format!("bad {} {:?}", name, value)))
}

/// Decodes each stat reply against the command that produced it. A reply
/// that does not open with one of its command's keys counts as failed, keys
/// belonging to other commands are ignored, and a bad value loses only its
/// own field. Every field that never arrived is listed in `unavailable`.
pub fn decode_system_stats<'a, I>(replies: I) -> SystemSample
where
    I: IntoIterator<Item = (Command, &'a str)>,
{
    let mut sample = SystemSample::default();
    let mut filled = HashSet::new();

    for (command, reply) in replies {
        let keys = command.stat_keys();
        let mut lines = reply.lines().map(str::trim).filter(|l| !l.is_empty()).peekable();

        match lines.peek().copied().map(|line| split_stat(line).0) {
            Some(key) if keys.contains(&key) => {}
            Some(ACK_ERROR) => {
                log::warn!("{} failed: {}", command.name(), preview(reply.trim()));
                continue;
            }
            Some(_) => {
                log::warn!(
                    "{} reply does not start with an expected key: {:?}",
                    command.name(),
                    preview(reply.trim())
                );
                continue;
            }
            None => {
                log::debug!("{} returned nothing", command.name());
                continue;
            }
        }

        for line in lines {
            let (key, values) = split_stat(line);
            if keys.contains(&key) {
                apply_stat(&mut sample, &mut filled, key, &values);
            } else {
                log::debug!("Ignoring {:?} in {} reply", key, command.name());
            }
        }
    }

    sample.unavailable = StatField::ALL
        .iter()
        .copied()
        .filter(|f| !filled.contains(f))
        .collect();
    sample
}

/// Splits `KEY;v1;v2` keeping value positions. Trailing empty values
/// (`NET;1;2;`) are dropped; inner ones stay and fail to parse.
fn split_stat(line: &str) -> (&str, Vec<&str>) {
    let mut parts = line.split(';').map(str::trim);
    let key = parts.next().unwrap_or_default();
    let mut values: Vec<&str> = parts.collect();
    while values.last().is_some_and(|v| v.is_empty()) {
        values.pop();
    }
    (key, values)
}

fn apply_stat(sample: &mut SystemSample, filled: &mut HashSet<StatField>, key: &str, values: &[&str]) {
    let fields: &[StatField] = match key {
        "CPU" => &[StatField::CpuUsage, StatField::SystemTotalTicks],
        "MEM_TOTAL" => &[StatField::MemTotal],
        "MEM_FREE" => &[StatField::MemFree],
        "MEM_AVAIL" => &[StatField::MemAvailable],
        "BUFFERS" => &[StatField::Buffers],
        "CACHED" => &[StatField::Cached],
        "SWAP_TOTAL" => &[StatField::SwapTotal],
        "SWAP_FREE" => &[StatField::SwapFree],
        "NET" => &[StatField::NetDown, StatField::NetUp],
        "DISK" => &[StatField::DiskUsed, StatField::DiskTotal],
        _ => return,
    };

    for (i, &field) in fields.iter().enumerate() {
        let Some(raw) = values.get(i) else {
            log::debug!("{} is missing value for {}", key, field);
            continue;
        };
        let ok = if field == StatField::CpuUsage {
            match raw.parse::<f64>() {
                Ok(v) if v.is_finite() => {
                    sample.cpu_usage_percent = v;
                    true
                }
                _ => false,
            }
        } else {
            match (counter_mut(sample, field), raw.parse::<u64>()) {
                (Some(slot), Ok(v)) => {
                    *slot = v;
                    true
                }
                _ => false,
            }
        };
        if ok {
            filled.insert(field);
        } else {
            log::warn!("Skipping {}: cannot parse {:?}", field, raw);
        }
    }
}

fn counter_mut(sample: &mut SystemSample, field: StatField) -> Option<&mut u64> {
    let slot = match field {
        StatField::SystemTotalTicks => &mut sample.system_total_ticks,
        StatField::MemTotal => &mut sample.mem_total_kb,
        StatField::MemFree => &mut sample.mem_free_kb,
        StatField::MemAvailable => &mut sample.mem_available_kb,
        StatField::Buffers => &mut sample.buffers_kb,
        StatField::Cached => &mut sample.cached_kb,
        StatField::SwapTotal => &mut sample.swap_total_kb,
        StatField::SwapFree => &mut sample.swap_free_kb,
        StatField::NetDown => &mut sample.net_down_bytes_per_sec,
        StatField::NetUp => &mut sample.net_up_bytes_per_sec,
        StatField::DiskUsed => &mut sample.disk_used_kb,
        StatField::DiskTotal => &mut sample.disk_total_kb,
        StatField::CpuUsage => return None,
    };
    Some(slot)
}

/// Decodes an `OK` / `ERROR;<reason>` acknowledgement.
pub fn decode_ack(raw: &str) -> Result<()> {
    let reply = raw.trim();
    if reply.starts_with(ACK_OK) {
        return Ok(());
    }
    if let Some(rest) = reply.strip_prefix(ACK_ERROR) {
        let reason = rest.trim_start_matches(';').trim();
        let reason = if reason.is_empty() { "unspecified" } else { reason };
        return Err(Error::CommandRejected(reason.to_string()));
    }
    Err(Error::unexpected("KILL", preview(raw)))
}

fn preview(raw: &str) -> String {
    raw.chars().take(64).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_commands_with_newline() {
        assert_eq!(Command::GetProcesses.encode(), "GET_PROCESSES\n");
        assert_eq!(Command::Kill { pid: 1234, signal: 15 }.encode(), "KILL;1234;15\n");
        assert_eq!(Command::GetMemStats.terminator(), None);
        assert_eq!(Command::GetProcesses.terminator(), Some("END_PROCESS_LIST"));
    }

    #[test]
    fn decodes_full_process_list() {
        let raw = "BEGIN_PROCESS_LIST\n\
                   1\t0\troot\tS\tsystemd\t900\t12000\n\
                   10\t1\talice\tR\tfirefox\t500\t204800\n\
                   END_PROCESS_LIST\n";
        let list = decode_process_list(raw).unwrap();
        assert!(list.complete);
        assert_eq!(list.malformed, 0);
        assert_eq!(list.processes.len(), 2);
        let ff = &list.processes[1];
        assert_eq!(ff.pid, 10);
        assert_eq!(ff.ppid, 1);
        assert_eq!(ff.user, "alice");
        assert_eq!(ff.state, "R");
        assert_eq!(ff.command, "firefox");
        assert_eq!(ff.cpu_time_ticks, 500);
        assert_eq!(ff.resident_memory_kb, 204800);
    }

    #[test]
    fn short_record_is_dropped_rest_kept() {
        let raw = "BEGIN_PROCESS_LIST\n\
                   1\t0\troot\tS\tsystemd\t900\t12000\n\
                   2\t0\troot\tS\n\
                   3\t1\tbob\tS\tsshd\t10\t300\n\
                   END_PROCESS_LIST\n";
        let list = decode_process_list(raw).unwrap();
        assert_eq!(list.malformed, 1);
        let pids: Vec<i32> = list.processes.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![1, 3]);
    }

    #[test]
    fn non_numeric_fields_are_malformed() {
        let raw = "BEGIN_PROCESS_LIST\nabc\t0\troot\tS\tx\t1\t1\n4\t1\tu\tS\ty\tlots\t1\nEND_PROCESS_LIST\n";
        let list = decode_process_list(raw).unwrap();
        assert!(list.processes.is_empty());
        assert_eq!(list.malformed, 2);
    }

    #[test]
    fn truncated_list_keeps_complete_records() {
        let raw = "BEGIN_PROCESS_LIST\n1\t0\troot\tS\tsystemd\t900\t12000\n2\t0\troot\tS\tkthr";
        let list = decode_process_list(raw).unwrap();
        assert!(!list.complete);
        assert_eq!(list.processes.len(), 1);
        assert_eq!(list.malformed, 1);
    }

    #[test]
    fn tab_in_command_name_is_kept() {
        let raw = "BEGIN_PROCESS_LIST\n7\t1\troot\tS\tweird\tname\t42\t8\nEND_PROCESS_LIST\n";
        let list = decode_process_list(raw).unwrap();
        assert_eq!(list.processes[0].command, "weird\tname");
        assert_eq!(list.processes[0].cpu_time_ticks, 42);
    }

    #[test]
    fn missing_begin_sentinel_is_unexpected() {
        let err = decode_process_list("ERROR;unknown command\n").unwrap_err();
        assert!(matches!(err, Error::UnexpectedResponse { .. }));
        assert!(decode_process_list("").is_err());
    }

    #[test]
    fn empty_list_is_complete() {
        let list = decode_process_list("BEGIN_PROCESS_LIST\nEND_PROCESS_LIST\n").unwrap();
        assert!(list.complete);
        assert!(list.processes.is_empty());
    }

    fn stats<'a>(cpu: &'a str, mem: &'a str, net: &'a str, disk: &'a str) -> [(Command, &'a str); 4] {
        [
            (Command::GetCpuStats, cpu),
            (Command::GetMemStats, mem),
            (Command::GetNetStats, net),
            (Command::GetDiskStats, disk),
        ]
    }

    #[test]
    fn decodes_all_stat_replies() {
        let sample = decode_system_stats(stats(
            "CPU;12.5;10000\n",
            "MEM_TOTAL;16000\nMEM_FREE;4000\nMEM_AVAIL;8000\nBUFFERS;100\nCACHED;2000\nSWAP_TOTAL;1000\nSWAP_FREE;900\n",
            "NET;2048;512;\n",
            "DISK;50000;100000\n",
        ));
        assert!(sample.unavailable.is_empty());
        assert_eq!(sample.cpu_usage_percent, 12.5);
        assert_eq!(sample.system_total_ticks, 10000);
        assert_eq!(sample.mem_total_kb, 16000);
        assert_eq!(sample.mem_available_kb, 8000);
        assert_eq!(sample.swap_free_kb, 900);
        assert_eq!(sample.net_down_bytes_per_sec, 2048);
        assert_eq!(sample.net_up_bytes_per_sec, 512);
        assert_eq!(sample.disk_total_kb, 100000);
    }

    #[test]
    fn bad_values_and_unknown_keys_are_isolated() {
        let sample = decode_system_stats(stats(
            "CPU;12.5\n",
            "MEM_TOTAL;lots\nMEM_FREE;4000\nHUGEPAGES;3\n",
            "ERROR;net\n",
            "",
        ));
        assert_eq!(sample.cpu_usage_percent, 12.5);
        assert_eq!(sample.mem_free_kb, 4000);
        assert!(!sample.is_available(StatField::SystemTotalTicks));
        assert!(!sample.is_available(StatField::MemTotal));
        assert!(!sample.is_available(StatField::NetDown));
        assert!(!sample.is_available(StatField::DiskUsed));
        assert!(sample.is_available(StatField::MemFree));
    }

    #[test]
    fn empty_inner_value_keeps_positions() {
        let sample = decode_system_stats(stats("CPU;;123456\n", "", "NET;;512\n", "DISK;;1000\n"));
        assert_eq!(sample.system_total_ticks, 123456);
        assert!(!sample.is_available(StatField::CpuUsage));
        assert_eq!(sample.cpu_usage_percent, 0.0);
        assert_eq!(sample.net_up_bytes_per_sec, 512);
        assert!(!sample.is_available(StatField::NetDown));
        assert_eq!(sample.disk_total_kb, 1000);
        assert_eq!(sample.disk_used_kb, 0);
        assert!(!sample.is_available(StatField::DiskUsed));
    }

    #[test]
    fn reply_for_another_command_is_rejected() {
        let sample = decode_system_stats(stats("CPU;5;1000\n", "", "CPU;0;0\n", "NET;1;2\n"));
        assert_eq!(sample.system_total_ticks, 1000);
        assert_eq!(sample.cpu_usage_percent, 5.0);
        assert!(!sample.is_available(StatField::NetDown));
        assert!(!sample.is_available(StatField::NetUp));
        assert!(!sample.is_available(StatField::DiskUsed));
        assert_eq!(sample.net_down_bytes_per_sec, 0);
    }

    #[test]
    fn foreign_keys_inside_a_reply_are_ignored() {
        let sample = decode_system_stats(stats("", "MEM_TOTAL;16000\nCPU;0;0\nDISK;1;2\n", "", ""));
        assert_eq!(sample.mem_total_kb, 16000);
        assert!(!sample.is_available(StatField::SystemTotalTicks));
        assert!(!sample.is_available(StatField::DiskTotal));
    }

    #[test]
    fn ack_decoding() {
        assert!(decode_ack("OK\n").is_ok());
        match decode_ack("ERROR;no such process\n") {
            Err(Error::CommandRejected(reason)) => assert_eq!(reason, "no such process"),
            other => panic!("unexpected {:?}", other),
        }
        assert!(matches!(decode_ack("ERROR"), Err(Error::CommandRejected(_))));
        assert!(matches!(decode_ack(""), Err(Error::UnexpectedResponse { .. })));
    }
}
