const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Human-scaled size, e.g. `1536` -> `"1.5 KB"`.
pub fn format_bytes(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

pub fn format_kb(kb: u64) -> String {
    format_bytes(kb.saturating_mul(1024))
}

pub fn format_rate(bytes_per_sec: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scales_sizes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_kb(2048), "2.0 MB");
        assert_eq!(format_kb(0), "0 B");
        assert_eq!(format_rate(1024 * 1024 * 3), "3.0 MB/s");
    }

    #[test]
    fn percent_has_one_decimal() {
        assert_eq!(format_percent(160.0), "160.0%");
        assert_eq!(format_percent(0.04), "0.0%");
    }
}
