//! Stdout classification for the Dev-Server Controller: a small explicit
//! state machine, unit-testable in isolation from process plumbing (§4.7,
//! §9 Design Notes).

use std::time::{Duration, Instant};

const COMPILE_HANG_THRESHOLD: Duration = Duration::from_secs(60);
const SILENT_HANG_THRESHOLD: Duration = Duration::from_secs(40);
const RUNTIME_HANG_TIMEOUTS: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    ReadyBanner,
    CompilationStarted,
    CompilationFinished,
    CompileErrorLine,
    OtherOutput,
}

/// Classifies one line of dev-server stdout into a `Signal`.
pub fn classify_line(line: &str) -> Signal {
    let lower = line.to_ascii_lowercase();

    if lower.contains("error:")
        || lower.contains("failed to compile")
        || lower.contains("module not found")
        || lower.contains("syntaxerror")
        || lower.contains("typeerror")
    {
        return Signal::CompileErrorLine;
    }

    if lower.contains("ready in") || lower.contains("compiled successfully") || lower.contains("ready -") {
        return Signal::ReadyBanner;
    }

    if lower.contains("compiling") || lower.contains("building") {
        return Signal::CompilationStarted;
    }

    if lower.contains("compiled") {
        return Signal::CompilationFinished;
    }

    Signal::OtherOutput
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Healthy,
    CompileError,
    CompileHang,
    RuntimeHang,
    SilentHang,
}

/// Tracks the three observables named in §4.7 and renders a verdict given
/// the current wall-clock instant.
pub struct ReadinessTracker {
    server_ready_seen: bool,
    compilation_in_progress_since: Option<Instant>,
    consecutive_http_timeouts: u32,
    http_confirmed: bool,
    last_output_time: Instant,
    compile_error: Option<String>,
}

impl ReadinessTracker {
    pub fn new(now: Instant) -> Self {
        Self {
            server_ready_seen: false,
            compilation_in_progress_since: None,
            consecutive_http_timeouts: 0,
            http_confirmed: false,
            last_output_time: now,
            compile_error: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.server_ready_seen
    }

    /// True once the stdout readiness banner has been seen *and* at least
    /// one HTTP poll against the chosen port has succeeded.
    pub fn is_confirmed_ready(&self) -> bool {
        self.server_ready_seen && self.http_confirmed
    }

    pub fn on_line(&mut self, line: &str, now: Instant) {
        self.last_output_time = now;
        match classify_line(line) {
            Signal::ReadyBanner => self.server_ready_seen = true,
            Signal::CompilationStarted => self.compilation_in_progress_since = Some(now),
            Signal::CompilationFinished => self.compilation_in_progress_since = None,
            Signal::CompileErrorLine => self.compile_error = Some(line.to_string()),
            Signal::OtherOutput => {}
        }
    }

    pub fn on_http_timeout(&mut self) {
        self.consecutive_http_timeouts += 1;
    }

    pub fn on_http_success(&mut self) {
        self.consecutive_http_timeouts = 0;
        self.http_confirmed = true;
    }

    /// Adaptive HTTP poll timeout: 30s once ready has been seen, else 10s.
    pub fn poll_timeout(&self) -> Duration {
        if self.server_ready_seen {
            Duration::from_secs(30)
        } else {
            Duration::from_secs(10)
        }
    }

    pub fn verdict(&self, now: Instant) -> Verdict {
        if let Some(error) = &self.compile_error {
            let _ = error;
            return Verdict::CompileError;
        }

        if let Some(since) = self.compilation_in_progress_since
            && now.duration_since(since) > COMPILE_HANG_THRESHOLD
        {
            return Verdict::CompileHang;
        }

        if self.consecutive_http_timeouts >= RUNTIME_HANG_TIMEOUTS {
            return Verdict::RuntimeHang;
        }

        if self.server_ready_seen
            && now.duration_since(self.last_output_time) > SILENT_HANG_THRESHOLD
            && self.consecutive_http_timeouts >= 1
        {
            return Verdict::SilentHang;
        }

        Verdict::Healthy
    }

    pub fn compile_error_message(&self) -> Option<&str> {
        self.compile_error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_ready_banner() {
        assert_eq!(classify_line("  ready in 512ms"), Signal::ReadyBanner);
    }

    #[test]
    fn classifies_compile_error() {
        assert_eq!(
            classify_line("Module not found: Can't resolve './x'"),
            Signal::CompileErrorLine
        );
    }

    #[test]
    fn compile_hang_fires_after_threshold() {
        let t0 = Instant::now();
        let mut tracker = ReadinessTracker::new(t0);
        tracker.on_line("compiling...", t0);
        let later = t0 + Duration::from_secs(61);
        assert_eq!(tracker.verdict(later), Verdict::CompileHang);
    }

    #[test]
    fn runtime_hang_fires_after_four_timeouts() {
        let t0 = Instant::now();
        let mut tracker = ReadinessTracker::new(t0);
        for _ in 0..4 {
            tracker.on_http_timeout();
        }
        assert_eq!(tracker.verdict(t0), Verdict::RuntimeHang);
    }

    #[test]
    fn silent_hang_requires_ready_and_stale_output_and_a_timeout() {
        let t0 = Instant::now();
        let mut tracker = ReadinessTracker::new(t0);
        tracker.on_line("ready in 400ms", t0);
        tracker.on_http_timeout();
        let later = t0 + Duration::from_secs(41);
        assert_eq!(tracker.verdict(later), Verdict::SilentHang);
    }

    #[test]
    fn healthy_when_nothing_has_fired() {
        let t0 = Instant::now();
        let tracker = ReadinessTracker::new(t0);
        assert_eq!(tracker.verdict(t0), Verdict::Healthy);
    }
}
