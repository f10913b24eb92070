use crate::types::Snapshot;
use crossbeam_channel::Receiver;
use std::io::{self, Write};

const BAR_WIDTH: usize = 30;

/// Renders a live ASCII dashboard of the published magnitudes.
pub struct ConsoleDisplay {
    rx: Receiver<Snapshot>,
    update_hz: u32,
    cycles_per_second: f64,
}

impl ConsoleDisplay {
    /// `cycles_per_second` is the bank's analysis rate, used to thin the
    /// snapshot stream down to `update_hz` redraws.
    pub fn new(rx: Receiver<Snapshot>, update_hz: u32, cycles_per_second: f64) -> Self {
        Self {
            rx,
            update_hz,
            cycles_per_second,
        }
    }

    /// Draw until the bank drops the subscription.
    pub fn run(&self) {
        let skip = redraw_interval(self.cycles_per_second, self.update_hz);
        let mut stdout = io::stdout();

        for snapshot in self.rx.iter() {
            if snapshot.cycle % skip != 0 {
                continue;
            }
            let _ = stdout.write_all(render(&snapshot).as_bytes());
            let _ = stdout.flush();
        }
    }
}

/// Cycles between redraws; at least 1.
fn redraw_interval(cycles_per_second: f64, update_hz: u32) -> u64 {
    if update_hz == 0 {
        return (cycles_per_second.round() as u64).max(1);
    }
    ((cycles_per_second / update_hz as f64).round() as u64).max(1)
}

fn render(snapshot: &Snapshot) -> String {
    let mut out = String::new();
    // Clear screen and move cursor home
    out.push_str("\x1b[2J\x1b[H");
    out.push_str("╔══════════════════════════════════════════════════════════╗\n");
    out.push_str("║  GOERTZEL BANK  Live Monitor                             ║\n");
    out.push_str("╠══════════════════════════════════════════════════════════╣\n");

    let secs = snapshot.timestamp_us as f64 / 1_000_000.0;
    out.push_str(&format!(
        "║  Time: {:>8.2}s   Cycle: {:<10}                      ║\n",
        secs, snapshot.cycle
    ));
    out.push_str(&format!(
        "║  Input: {} {:.3}           ║\n",
        make_bar(snapshot.input_rms, BAR_WIDTH),
        snapshot.input_rms
    ));

    out.push_str("║                                                          ║\n");
    out.push_str("║  Magnitudes:                                             ║\n");
    if snapshot.magnitudes.is_empty() {
        out.push_str("║    (no analyzers)                                        ║\n");
    }
    for &(freq, mag) in &snapshot.magnitudes {
        out.push_str(&format!(
            "║  {:>8.1} Hz {} {:>5.1}%        ║\n",
            freq,
            make_bar(mag, BAR_WIDTH),
            mag * 100.0
        ));
    }

    out.push_str("║                                                          ║\n");
    match snapshot.wideband {
        Some(w) => out.push_str(&format!(
            "║  Wideband: {} {:+.2}          ║\n",
            make_balance(w, BAR_WIDTH),
            w
        )),
        None => out.push_str("║  Wideband: --- (disabled)                                ║\n"),
    }
    out.push_str("╚══════════════════════════════════════════════════════════╝\n");
    out
}

fn make_bar(val: f32, width: usize) -> String {
    let filled = ((val.clamp(0.0, 1.0)) * width as f32).round() as usize;
    let empty = width.saturating_sub(filled);
    format!("[{}{}]", "█".repeat(filled), "░".repeat(empty))
}

/// Centered bar for a value in [-1, 1]: low-band energy fills left of the
/// marker, high-band energy right of it.
fn make_balance(val: f32, width: usize) -> String {
    let half = width / 2;
    let reach = (val.clamp(-1.0, 1.0).abs() * half as f32).round() as usize;
    let mut bar = String::with_capacity(width + 2);
    bar.push('[');
    for i in 0..half {
        bar.push(if val > 0.0 && i >= half - reach { '█' } else { '░' });
    }
    bar.push('│');
    for i in 0..half {
        bar.push(if val < 0.0 && i < reach { '█' } else { '░' });
    }
    bar.push(']');
    bar
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_make_bar_clamps() {
        assert_eq!(make_bar(0.5, 4), "[██░░]");
        assert_eq!(make_bar(2.0, 4), "[████]");
        assert_eq!(make_bar(-1.0, 4), "[░░░░]");
    }

    #[test]
    fn test_balance_sides() {
        assert_eq!(make_balance(1.0, 4), "[██│░░]");
        assert_eq!(make_balance(-0.5, 4), "[░░│█░]");
        assert_eq!(make_balance(0.0, 4), "[░░│░░]");
    }

    #[test]
    fn test_redraw_interval() {
        assert_eq!(redraw_interval(93.75, 20), 5);
        assert_eq!(redraw_interval(10.0, 100), 1);
        assert_eq!(redraw_interval(93.75, 0), 94);
    }

    #[test]
    fn test_render_lists_every_frequency() {
        let snap = Snapshot {
            cycle: 10,
            timestamp_us: 1_500_000,
            magnitudes: vec![(440.0, 0.25), (1000.0, 1.0)],
            wideband: Some(0.8),
            input_rms: 0.7,
        };
        let text = render(&snap);
        assert!(text.contains("440.0 Hz"));
        assert!(text.contains("1000.0 Hz"));
        assert!(text.contains("+0.80"));
        assert!(text.contains("1.50s"));
    }
}
