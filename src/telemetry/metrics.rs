// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process counters for connections, tool calls and model requests.
//!
//! Operation names in use: `mcp.connect`, `mcp.handshake`,
//! `gemini.chat`, `gemini.stream_chat`, `gemini.complete`. Tool metrics are
//! keyed by the qualified tool name and by `mcp.{server}.{tool}`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use serde::Serialize;

/// Process-wide collector.
pub static GLOBAL_METRICS: Lazy<Metrics> = Lazy::new(Metrics::new);

#[derive(Debug)]
pub struct Metrics {
    tools: RwLock<BTreeMap<String, ToolMetrics>>,
    operations: RwLock<BTreeMap<String, OperationMetrics>>,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    start_time: Instant,
}

// A panic while holding a metrics lock leaves plain counters behind, which
// are still safe to read.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(BTreeMap::new()),
            operations: RwLock::new(BTreeMap::new()),
            input_tokens: AtomicU64::new(0),
            output_tokens: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record one tool invocation.
    pub fn record_tool(&self, name: &str, duration: Duration, success: bool) {
        write(&self.tools)
            .entry(name.to_string())
            .or_default()
            .record(duration, success);
    }

    /// Record one timed operation.
    pub fn record_operation(&self, name: &str, duration: Duration) {
        write(&self.operations)
            .entry(name.to_string())
            .or_default()
            .record(duration);
    }

    pub fn record_tokens(&self, input: u64, output: u64) {
        self.input_tokens.fetch_add(input, Ordering::Relaxed);
        self.output_tokens.fetch_add(output, Ordering::Relaxed);
    }

    pub fn tool_metrics(&self, name: &str) -> Option<ToolMetrics> {
        read(&self.tools).get(name).cloned()
    }

    pub fn operation_metrics(&self, name: &str) -> Option<OperationMetrics> {
        read(&self.operations).get(name).cloned()
    }

    /// `(input, output)` token totals.
    pub fn token_counts(&self) -> (u64, u64) {
        (
            self.input_tokens.load(Ordering::Relaxed),
            self.output_tokens.load(Ordering::Relaxed),
        )
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (input_tokens, output_tokens) = self.token_counts();
        MetricsSnapshot {
            tools: read(&self.tools).clone(),
            operations: read(&self.operations).clone(),
            input_tokens,
            output_tokens,
            uptime: self.start_time.elapsed(),
        }
    }

    pub fn reset(&self) {
        write(&self.tools).clear();
        write(&self.operations).clear();
        self.input_tokens.store(0, Ordering::Relaxed);
        self.output_tokens.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Counters for one tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolMetrics {
    pub invocations: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
}

impl ToolMetrics {
    pub fn record(&mut self, duration: Duration, success: bool) {
        self.invocations += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_duration += duration;
        self.max_duration = self.max_duration.max(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        average(self.total_duration, self.invocations)
    }

    /// Share of successful calls, 1.0 when nothing was recorded.
    pub fn success_rate(&self) -> f64 {
        if self.invocations == 0 {
            1.0
        } else {
            self.successes as f64 / self.invocations as f64
        }
    }
}

impl Default for ToolMetrics {
    fn default() -> Self {
        Self {
            invocations: 0,
            successes: 0,
            failures: 0,
            total_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
        }
    }
}

/// Latency distribution of one operation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct OperationMetrics {
    pub count: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
    pub histogram: Histogram,
}

impl OperationMetrics {
    pub fn record(&mut self, duration: Duration) {
        self.count += 1;
        self.total_duration += duration;
        self.max_duration = self.max_duration.max(duration);
        self.histogram.record(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        average(self.total_duration, self.count)
    }
}

fn average(total: Duration, count: u64) -> Duration {
    match u32::try_from(count) {
        Ok(0) => Duration::ZERO,
        Ok(n) => total / n,
        Err(_) => Duration::from_secs_f64(total.as_secs_f64() / count as f64),
    }
}

/// Fixed-bucket latency histogram. Bounds are upper limits in milliseconds;
/// the last count is the overflow bucket.
#[derive(Debug, Clone, Serialize)]
pub struct Histogram {
    bounds_ms: Vec<u64>,
    counts: Vec<u64>,
}

impl Histogram {
    pub fn with_bounds(bounds_ms: Vec<u64>) -> Self {
        let counts = vec![0; bounds_ms.len() + 1];
        Self { bounds_ms, counts }
    }

    pub fn record(&mut self, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        let idx = self
            .bounds_ms
            .iter()
            .position(|&bound| millis <= bound)
            .unwrap_or(self.bounds_ms.len());
        self.counts[idx] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    /// Upper bound of the bucket holding the `p`th percentile. Samples in
    /// the overflow bucket report twice the largest bound.
    pub fn percentile(&self, p: f64) -> Duration {
        let total: u64 = self.counts.iter().sum();
        if total == 0 {
            return Duration::ZERO;
        }
        let target = ((total as f64 * p / 100.0).ceil() as u64).max(1);
        let mut seen = 0;
        for (i, &count) in self.counts.iter().enumerate() {
            seen += count;
            if seen >= target {
                let bound = self
                    .bounds_ms
                    .get(i)
                    .copied()
                    .unwrap_or_else(|| self.bounds_ms.last().copied().unwrap_or(0) * 2);
                return Duration::from_millis(bound);
            }
        }
        Duration::ZERO
    }

    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    /// Buckets sized for network round trips and process spawns.
    fn default() -> Self {
        Self::with_bounds(vec![10, 50, 250, 1_000, 5_000, 30_000])
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub tools: BTreeMap<String, ToolMetrics>,
    pub operations: BTreeMap<String, OperationMetrics>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub uptime: Duration,
}

impl MetricsSnapshot {
    /// Plain-text report for `--metrics` output.
    pub fn format_report(&self) -> String {
        let mut report = format!(
            "Uptime: {:.2?}\nTokens: {} input, {} output\n",
            self.uptime, self.input_tokens, self.output_tokens
        );

        if !self.operations.is_empty() {
            report.push_str("\nOperations:\n");
            for (name, m) in &self.operations {
                report.push_str(&format!(
                    "  {}: {} runs, avg {:.2?}, p99 <= {:.2?}\n",
                    name,
                    m.count,
                    m.avg_duration(),
                    m.histogram.p99()
                ));
            }
        }

        if !self.tools.is_empty() {
            report.push_str("\nTools:\n");
            for (name, m) in &self.tools {
                report.push_str(&format!(
                    "  {}: {} calls, {:.0}% ok, avg {:.2?}\n",
                    name,
                    m.invocations,
                    m.success_rate() * 100.0,
                    m.avg_duration()
                ));
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_metrics() {
        let metrics = Metrics::new();
        metrics.record_tool("mcp__time_now", Duration::from_millis(100), true);
        metrics.record_tool("mcp__time_now", Duration::from_millis(300), false);

        let tool = metrics.tool_metrics("mcp__time_now").unwrap();
        assert_eq!(tool.invocations, 2);
        assert_eq!(tool.failures, 1);
        assert_eq!(tool.avg_duration(), Duration::from_millis(200));
        assert_eq!(tool.max_duration, Duration::from_millis(300));
        assert!((tool.success_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_histogram_buckets() {
        let mut hist = Histogram::default();
        hist.record(Duration::from_millis(5));
        hist.record(Duration::from_millis(40));
        hist.record(Duration::from_secs(60));

        assert_eq!(hist.counts()[0], 1);
        assert_eq!(hist.counts()[1], 1);
        assert_eq!(hist.counts()[6], 1);
        assert_eq!(hist.p50(), Duration::from_millis(50));
        assert_eq!(hist.p99(), Duration::from_millis(60_000));
    }

    #[test]
    fn test_empty_histogram() {
        assert_eq!(Histogram::default().p99(), Duration::ZERO);
        assert_eq!(OperationMetrics::default().avg_duration(), Duration::ZERO);
    }

    #[test]
    fn test_snapshot_and_reset() {
        let metrics = Metrics::new();
        metrics.record_operation("mcp.connect", Duration::from_millis(20));
        metrics.record_tokens(120, 30);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.operations["mcp.connect"].count, 1);
        assert_eq!((snapshot.input_tokens, snapshot.output_tokens), (120, 30));
        let report = snapshot.format_report();
        assert!(report.contains("mcp.connect: 1 runs"));
        assert!(report.contains("Tokens: 120 input, 30 output"));

        metrics.reset();
        assert!(metrics.operation_metrics("mcp.connect").is_none());
        assert_eq!(metrics.token_counts(), (0, 0));
    }
}
