//! Terminal styling shared by the banners and tables.

use colored::{ColoredString, Colorize};

pub const BAR_FULL: char = '█';
pub const BAR_EMPTY: char = '░';

pub fn tick() -> ColoredString {
    "✓".green().bold()
}

pub fn cross() -> ColoredString {
    "✗".red().bold()
}

pub fn info() -> ColoredString {
    "[i]".yellow()
}

pub fn warn_mark() -> ColoredString {
    "⚠".yellow().bold()
}

pub fn heading(title: &str) -> ColoredString {
    title.cyan().bold()
}

/// Filled/empty cell counts for a bar of `width` cells. Percent is clamped to 0..=100.
pub fn bar_cells(percent: f64, width: usize) -> (usize, usize) {
    let pct = if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 100.0) };
    let filled = ((pct / 100.0) * width as f64).round() as usize;
    let filled = filled.min(width);
    (filled, width - filled)
}

/// `[█████░░░░░]  50%`, green below `warn`, yellow below `crit`, red above.
pub fn usage_bar(percent: f64, width: usize, warn: f64, crit: f64) -> String {
    let (filled, empty) = bar_cells(percent, width);
    let bar = format!(
        "{}{}",
        BAR_FULL.to_string().repeat(filled),
        BAR_EMPTY.to_string().repeat(empty)
    );
    let pct = if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 100.0) };
    let bar = if pct >= crit {
        bar.red()
    } else if pct >= warn {
        bar.yellow()
    } else {
        bar.green()
    };
    format!("[{}] {:>3.0}%", bar, pct)
}

/// 1024-based sizes: `512B`, `1.5K`, `3.6T`.
pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "K", "M", "G", "T", "P"];
    if bytes < 1024 {
        return format!("{bytes}B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1}{}", value, UNITS[unit])
}

/// Temperature colored green, yellow from `warn`, red from `warn + 10`.
pub fn temp_colored(celsius: f64, warn: f64) -> ColoredString {
    let text = format!("{celsius:.1}°C");
    if celsius >= warn + 10.0 {
        text.red().bold()
    } else if celsius >= warn {
        text.yellow()
    } else {
        text.green()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_are_humanized() {
        assert_eq!(human_bytes(0), "0B");
        assert_eq!(human_bytes(512), "512B");
        assert_eq!(human_bytes(1536), "1.5K");
        assert_eq!(human_bytes(1024 * 1024 * 1024), "1.0G");
        assert_eq!(human_bytes(4_000_787_030_016), "3.6T");
    }

    #[test]
    fn bar_cells_clamp_out_of_range() {
        assert_eq!(bar_cells(50.0, 10), (5, 5));
        assert_eq!(bar_cells(150.0, 10), (10, 0));
        assert_eq!(bar_cells(-5.0, 10), (0, 10));
        assert_eq!(bar_cells(f64::NAN, 4), (0, 4));
    }

    #[test]
    fn usage_bar_has_width_and_percent() {
        colored::control::set_override(false);
        let bar = usage_bar(30.0, 10, 80.0, 90.0);
        assert_eq!(bar, "[███░░░░░░░]  30%");
    }
}
