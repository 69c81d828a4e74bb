// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging and in-process metrics.
//!
//! Logging goes through `tracing`; [`init_telemetry`] installs the
//! subscriber once at startup. Connection attempts, handshakes, tool calls
//! and model requests are recorded in [`GLOBAL_METRICS`] when the
//! `telemetry` feature is enabled.
//!
//! ```rust,ignore
//! use toolbridge::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::default())?;
//! ```

mod init;
pub mod metrics;

pub use init::{init_telemetry, TelemetryConfig, TelemetryGuard};
pub use metrics::{Histogram, Metrics, MetricsSnapshot, OperationMetrics, ToolMetrics, GLOBAL_METRICS};
