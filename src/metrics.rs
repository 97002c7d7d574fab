/// Exponentially weighted rate over irregular sampling intervals, used for
/// the live progress line while a benchmark runs.
pub struct ThroughputAverager {
    tau_secs: f64,
    smoothed_bps: f64,
}

impl ThroughputAverager {
    pub fn new(tau_secs: f64) -> Self {
        Self { tau_secs, smoothed_bps: 0.0 }
    }

    pub fn update(&mut self, bytes_delta: u64, dt_secs: f64) -> f64 {
        let dt = dt_secs.max(1e-3);
        let alpha = 1.0 - (-dt / self.tau_secs).exp();
        let inst = (bytes_delta as f64) / dt;
        self.smoothed_bps = self.smoothed_bps * (1.0 - alpha) + inst * alpha;
        self.smoothed_bps
    }
}

const RATE_UNITS: [&str; 4] = ["Gbps", "Mbps", "Kbps", "bps"];

/// Render a bytes/second rate in bits/second, picking the largest unit
/// (1024-based) whose value exceeds 0.1.
pub fn format_rate(bytes_per_sec: u64) -> String {
    let bps = 8.0 * bytes_per_sec as f64;
    let scaled = [bps / 1024f64.powi(3), bps / 1024f64.powi(2), bps / 1024.0];

    for (value, unit) in scaled.iter().zip(RATE_UNITS) {
        if *value > 0.1 {
            return format!("{value:.2} {unit}");
        }
    }
    format!("{bps:.2} bps")
}
