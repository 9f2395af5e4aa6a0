//! Human-readable byte sizes for transfer messages.

const UNITS: [(u64, &str); 4] = [(1 << 40, "T"), (1 << 30, "G"), (1 << 20, "M"), (1 << 10, "K")];

/// Formats `bytes` with one decimal in the largest fitting unit: `512B`, `1.5K`, `10M`.
pub fn format_byte_size(bytes: u64) -> String {
    for (unit, suffix) in UNITS {
        if bytes >= unit {
            let value = format!("{:.1}", bytes as f64 / unit as f64);
            let value = value.strip_suffix(".0").unwrap_or(&value);
            return format!("{}{}", value, suffix);
        }
    }
    format!("{}B", bytes)
}
