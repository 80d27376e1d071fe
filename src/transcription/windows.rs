//! Window planning for long audio slices.
//!
//! Long slices are cut into fixed-duration windows whose byte ranges are
//! derived proportionally from the duration estimate. The last window is
//! truncated to the remaining duration.

/// One planned window over an audio slice.
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    /// Zero-based window index.
    pub index: usize,
    /// Start offset within the slice, in seconds.
    pub start_secs: f64,
    /// Window duration, in seconds.
    pub duration_secs: f64,
    /// Byte range within the slice buffer.
    pub byte_start: usize,
    pub byte_end: usize,
}

/// Raw sample width; byte boundaries are aligned to it so a window never
/// splits a 16-bit sample in half.
const SAMPLE_ALIGN: usize = 2;

/// Plan windows over a slice of `byte_len` bytes estimated at
/// `duration_secs`. A slice at or under `window_secs` yields one window.
pub fn plan_windows(
    byte_len: usize,
    duration_secs: f64,
    window_secs: u32,
    bytes_per_second: u64,
) -> Vec<Window> {
    if byte_len == 0 {
        return Vec::new();
    }

    let window_len = window_secs as f64;
    if duration_secs <= window_len {
        return vec![Window {
            index: 0,
            start_secs: 0.0,
            duration_secs,
            byte_start: 0,
            byte_end: byte_len,
        }];
    }

    let mut windows = Vec::new();
    let mut start = 0.0;
    let mut index = 0;

    while start < duration_secs {
        let duration = window_len.min(duration_secs - start);
        let byte_start = align(seconds_to_bytes(start, bytes_per_second), byte_len);
        let byte_end = if start + duration >= duration_secs {
            byte_len
        } else {
            align(seconds_to_bytes(start + duration, bytes_per_second), byte_len)
        };

        if byte_end > byte_start {
            windows.push(Window {
                index,
                start_secs: start,
                duration_secs: duration,
                byte_start,
                byte_end,
            });
            index += 1;
        }

        start += window_len;
    }

    windows
}

fn seconds_to_bytes(secs: f64, bytes_per_second: u64) -> usize {
    (secs * bytes_per_second as f64) as usize
}

fn align(offset: usize, max: usize) -> usize {
    (offset - offset % SAMPLE_ALIGN).min(max)
}
