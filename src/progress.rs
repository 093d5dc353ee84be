// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use tracing::info;

/// Receives one call per data block sent or received.
///
/// Called on the transfer thread, so implementations must return quickly.
pub trait ProgressSink: Send + Sync {
    fn on_sent(&self, file: Option<&str>, blocks: u64, percent: u8);

    fn on_received(&self, file: Option<&str>, blocks: u64, percent: u8);
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_sent(&self, _file: Option<&str>, _blocks: u64, _percent: u8) {}

    fn on_received(&self, _file: Option<&str>, _blocks: u64, _percent: u8) {}
}

/// Logs progress at `info` level whenever the percentage moves.
#[derive(Default)]
pub struct LogProgress {
    last: std::sync::atomic::AtomicU8,
}

impl LogProgress {
    fn report(&self, verb: &str, file: Option<&str>, blocks: u64, percent: u8) {
        use std::sync::atomic::Ordering;
        if blocks == 1 || self.last.swap(percent, Ordering::Relaxed) != percent {
            info!("{} {}: block {} ({}%)", verb, file.unwrap_or("file"), blocks, percent);
        }
    }
}

impl ProgressSink for LogProgress {
    fn on_sent(&self, file: Option<&str>, blocks: u64, percent: u8) {
        self.report("Sent", file, blocks, percent);
    }

    fn on_received(&self, file: Option<&str>, blocks: u64, percent: u8) {
        self.report("Received", file, blocks, percent);
    }
}

/// `done` out of `total` as a percentage clamped to 100. Unknown totals report 0.
pub fn percent(done: u64, total: Option<u64>) -> u8 {
    match total {
        Some(0) => 100,
        Some(total) => (done.saturating_mul(100) / total).min(100) as u8,
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(0, Some(1000)), 0);
        assert_eq!(percent(500, Some(1000)), 50);
        assert_eq!(percent(1024, Some(1000)), 100);
        assert_eq!(percent(10, Some(0)), 100);
        assert_eq!(percent(10, None), 0);
    }
}
