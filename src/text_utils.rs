use crate::settings::DisplayFormat;

/// Magnitude suffixes for compact counts, one per power of one thousand.
///
/// Stops at trillions; nothing on the platform gets near that many players.
const COMPACT_SUFFIXES: [&str; 5] = ["", "K", "M", "B", "T"];

pub fn format_count(count: u64, format: DisplayFormat) -> String {
    match format {
        DisplayFormat::Compact => format_compact(count),
        DisplayFormat::Full => format_with_separators(count),
    }
}

/// `1234567` -> `1,234,567`
pub fn format_with_separators(count: u64) -> String {
    let digits = count.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// `1500` -> `1.5K`, `1000000` -> `1M`. One decimal, dropped when it is zero.
pub fn format_compact(count: u64) -> String {
    let last = COMPACT_SUFFIXES.len() - 1;
    let mut tier = 0;
    while tier < last && count >= 1000u64.pow(tier as u32 + 1) {
        tier += 1;
    }

    let mut rounded = round_one_decimal(count as f64 / 1000u64.pow(tier as u32) as f64);
    // 999_960 rounds to 1000.0K; show it as 1M instead.
    if rounded >= 1000.0 && tier < last {
        tier += 1;
        rounded = round_one_decimal(count as f64 / 1000u64.pow(tier as u32) as f64);
    }

    let suffix = COMPACT_SUFFIXES[tier];
    if rounded.fract() == 0.0 {
        format!("{}{}", rounded as u64, suffix)
    } else {
        format!("{:.1}{}", rounded, suffix)
    }
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_small_values_unchanged() {
        assert_eq!(format_compact(0), "0");
        assert_eq!(format_compact(7), "7");
        assert_eq!(format_compact(999), "999");
    }

    #[test]
    fn compact_drops_zero_decimal() {
        assert_eq!(format_compact(1000), "1K");
        assert_eq!(format_compact(1_000_000), "1M");
        assert_eq!(format_compact(3_000_000_000), "3B");
        assert_eq!(format_compact(1040), "1K");
    }

    #[test]
    fn compact_keeps_single_decimal() {
        assert_eq!(format_compact(1500), "1.5K");
        assert_eq!(format_compact(1060), "1.1K");
        assert_eq!(format_compact(12_345), "12.3K");
        assert_eq!(format_compact(2_750_000), "2.8M");
    }

    #[test]
    fn compact_promotes_values_that_round_up_to_next_unit() {
        assert_eq!(format_compact(999_960), "1M");
        assert_eq!(format_compact(999_949), "999.9K");
    }

    #[test]
    fn compact_stays_in_last_unit_past_table_end() {
        assert_eq!(format_compact(5_000_000_000_000_000), "5000T");
    }

    #[test]
    fn full_inserts_thousands_separators() {
        assert_eq!(format_with_separators(0), "0");
        assert_eq!(format_with_separators(999), "999");
        assert_eq!(format_with_separators(1000), "1,000");
        assert_eq!(format_with_separators(1_234_567), "1,234,567");
    }

    #[test]
    fn format_count_dispatches_on_format() {
        assert_eq!(format_count(45_210, DisplayFormat::Compact), "45.2K");
        assert_eq!(format_count(45_210, DisplayFormat::Full), "45,210");
    }
}
