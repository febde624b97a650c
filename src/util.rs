//! Small helpers for naming files and printing sizes.

/// Characters that are not allowed in file names on common file systems.
const RESERVED: [char; 9] = ['\\', '/', '*', '?', ':', '"', '<', '>', '|'];

/// Makes `name` safe to use as a single path component.
///
/// Reserved characters and control characters become `_`, surrounding
/// whitespace and trailing dots are removed. Names that end up empty, or
/// that would refer to the current or parent directory, become `_`.
#[must_use]
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if RESERVED.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let sanitized = sanitized.trim().trim_end_matches('.').trim_end();
    if sanitized.is_empty() {
        "_".to_owned()
    } else {
        sanitized.to_owned()
    }
}

/// File name stem of a track inside an album: `NN Title`.
#[must_use]
pub fn track_stem(number: u32, title: &str) -> String {
    format!("{number:02} {}", sanitize_filename(title))
}

/// Formats a byte count with binary units and two decimals, like `3.20MB`.
#[must_use]
#[expect(clippy::cast_precision_loss)]
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    format!("{value:.2}{}", UNITS[unit])
}
