use crate::error::Result;
use crate::model::{ProcessInfo, SystemSnapshot};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Escape a string for CSV by wrapping in quotes if it contains special chars
/// and doubling internal quotes
fn csv_escape(s: &str) -> String {
    if s.contains('"') || s.contains(',') || s.contains('\n') || s.contains('\t') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

/// Export process list to CSV
pub fn export_processes_csv(path: &Path, processes: &[ProcessInfo]) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    write_processes_csv(&mut file, processes)?;
    file.flush()?;
    Ok(())
}

pub fn write_processes_csv<W: Write>(out: &mut W, processes: &[ProcessInfo]) -> Result<()> {
    writeln!(out, "PID,PPID,User,State,CPU%,Memory(KB),Memory%,Command")?;

    for p in processes {
        writeln!(
            out,
            "{},{},{},{},{:.2},{},{:.2},{}",
            p.pid,
            p.ppid,
            csv_escape(&p.user),
            csv_escape(&p.state),
            p.cpu_percent,
            p.memory_kb,
            p.memory_percent,
            csv_escape(&p.command),
        )?;
    }

    Ok(())
}

/// Export the dashboard figures of one snapshot as a single CSV row
pub fn export_system_csv(path: &Path, snapshot: &SystemSnapshot) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    let s = &snapshot.system;
    writeln!(
        file,
        "Cycle,CPU%,MemoryUsed(KB),MemoryTotal(KB),MemoryAvailable(KB),MemoryCached(KB),\
         SwapUsed(KB),SwapTotal(KB),NetDown(B/s),NetUp(B/s),DiskUsed(KB),DiskTotal(KB),ProcessCount"
    )?;
    writeln!(
        file,
        "{},{:.2},{},{},{},{},{},{},{},{},{},{},{}",
        snapshot.cycle,
        s.cpu.usage_percent,
        s.memory.used_kb,
        s.memory.total_kb,
        s.memory.available_kb,
        s.memory.cached_kb,
        s.swap.used_kb,
        s.swap.total_kb,
        s.network.down_bytes_per_sec,
        s.network.up_bytes_per_sec,
        s.disk.used_kb,
        s.disk.total_kb,
        snapshot.process_count,
    )?;
    file.flush()?;
    Ok(())
}

/// Export the whole snapshot as pretty JSON
pub fn export_snapshot_json(path: &Path, snapshot: &SystemSnapshot) -> Result<()> {
    let file = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(file, snapshot)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ProcessSample, SystemInfo};

    fn snapshot() -> SystemSnapshot {
        let mut info = ProcessInfo::from_sample(
            ProcessSample {
                pid: 42,
                ppid: 1,
                user: "alice".into(),
                state: "S".into(),
                command: "say \"hi\", twice".into(),
                cpu_time_ticks: 10,
                resident_memory_kb: 2048,
            },
            0,
        );
        info.cpu_percent = 12.5;
        SystemSnapshot::new(7, vec![info], SystemInfo::default())
    }

    #[test]
    fn process_csv_escapes_commands() {
        let mut out = Vec::new();
        write_processes_csv(&mut out, &snapshot().processes).unwrap();
        let text = String::from_utf8(out).unwrap();
        let row = text.lines().nth(1).unwrap();
        assert_eq!(row, "42,1,alice,S,12.50,2048,0.00,\"say \"\"hi\"\", twice\"");
    }

    #[test]
    fn json_export_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        export_snapshot_json(&path, &snapshot()).unwrap();

        let data = std::fs::read_to_string(&path).unwrap();
        let back: SystemSnapshot = serde_json::from_str(&data).unwrap();
        assert_eq!(back.cycle, 7);
        assert_eq!(back.process(42).map(|p| p.memory_kb), Some(2048));
    }

    #[test]
    fn system_csv_has_header_and_row() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system.csv");
        export_system_csv(&path, &snapshot()).unwrap();
        let data = std::fs::read_to_string(&path).unwrap();
        assert_eq!(data.lines().count(), 2);
        assert!(data.lines().nth(1).unwrap().starts_with("7,"));
    }
}
