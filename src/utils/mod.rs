pub mod environment;
pub mod reporter;
pub mod runner;
pub mod statements;

use anyhow::{Context, Result};
use std::path::PathBuf;
use which::which;

/// Finds an executable in the system PATH. The first whitespace-separated word
/// of `utility` is looked up, so configured values may carry arguments.
pub fn find_executable(utility: &str) -> Result<PathBuf> {
    let program = utility.split_whitespace().next().unwrap_or(utility);
    which(program).with_context(|| {
        format!(
            "{} executable not found in PATH. Please ensure the MySQL client tools are installed and in your PATH.",
            program
        )
    })
}

/// Human-readable byte count: `B`, `KB`, `MB`, `GB`, `TB` with two decimals.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value > 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    let rounded = (value * 100.0).round() / 100.0;
    format!("{} {}", rounded, UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1024), "1024 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5 MB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024 * 1024 * 1024), "3072 TB");
    }

    #[test]
    fn test_find_executable() {
        assert!(find_executable("sh -c").is_ok());
        assert!(find_executable("definitely-not-a-real-binary-4242").is_err());
    }
}
