pub const DISK_IO_UNITS: &[&str] = &["K", "M", "G"];
pub const BYTE_RATE_UNITS: &[&str] = &["B", "K", "M", "G"];
pub const BIT_RATE_UNITS: &[&str] = &["b", "k", "m", "g"];
pub const SIZE_UNITS: &[&str] = &["K", "M", "G", "T"];
pub const MIB_UNITS: &[&str] = &["M", "G", "T"];

pub const PAIR_SEPARATOR: &str = "|";

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Scaled {
    pub value: f64,
    pub unit: &'static str,
}

/// Walks the unit ladder: divide by `base` and promote while the value is
/// strictly greater than `base` and a larger unit exists.
pub fn scale(value: f64, base: f64, units: &'static [&'static str]) -> Scaled {
    let mut value = value;
    let mut idx = 0;
    while value > base && idx + 1 < units.len() {
        value /= base;
        idx += 1;
    }
    Scaled {
        value,
        unit: units[idx],
    }
}

pub fn format_number(value: f64, places: usize) -> String {
    format!("{:.*}", places, value)
}

pub fn format_scaled(scaled: Scaled, places: usize) -> String {
    format!("{}{}", format_number(scaled.value, places), scaled.unit)
}

pub fn format_pair(first: Scaled, second: Scaled, places: usize) -> String {
    format!(
        "{}{}{}",
        format_scaled(first, places),
        PAIR_SEPARATOR,
        format_scaled(second, places)
    )
}

pub fn celsius_to_fahrenheit(celsius: f64) -> f64 {
    celsius * 1.8 + 32.0
}
