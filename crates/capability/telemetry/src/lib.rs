//! 追踪初始化与协议层计数器。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 计数器快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sends: u64,
    pub send_failures: u64,
    pub receives: u64,
    pub receive_failures: u64,
    pub servers_started: u64,
    pub servers_stopped: u64,
    pub stop_failures: u64,
}

/// 进程级计数器。
pub struct TelemetryMetrics {
    sends: AtomicU64,
    send_failures: AtomicU64,
    receives: AtomicU64,
    receive_failures: AtomicU64,
    servers_started: AtomicU64,
    servers_stopped: AtomicU64,
    stop_failures: AtomicU64,
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            sends: AtomicU64::new(0),
            send_failures: AtomicU64::new(0),
            receives: AtomicU64::new(0),
            receive_failures: AtomicU64::new(0),
            servers_started: AtomicU64::new(0),
            servers_stopped: AtomicU64::new(0),
            stop_failures: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sends: self.sends.load(Ordering::Relaxed),
            send_failures: self.send_failures.load(Ordering::Relaxed),
            receives: self.receives.load(Ordering::Relaxed),
            receive_failures: self.receive_failures.load(Ordering::Relaxed),
            servers_started: self.servers_started.load(Ordering::Relaxed),
            servers_stopped: self.servers_stopped.load(Ordering::Relaxed),
            stop_failures: self.stop_failures.load(Ordering::Relaxed),
        }
    }
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info，可用 RUST_LOG 覆盖）。重复调用无副作用。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 记录一次成功写入。
pub fn record_send() {
    metrics().sends.fetch_add(1, Ordering::Relaxed);
}

/// 记录一次失败写入。
pub fn record_send_failure() {
    metrics().send_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录一次成功读取。
pub fn record_receive() {
    metrics().receives.fetch_add(1, Ordering::Relaxed);
}

/// 记录一次失败读取。
pub fn record_receive_failure() {
    metrics().receive_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录模拟服务端进程启动。
pub fn record_server_started() {
    metrics().servers_started.fetch_add(1, Ordering::Relaxed);
}

/// 记录模拟服务端进程停止。
pub fn record_server_stopped() {
    metrics().servers_stopped.fetch_add(1, Ordering::Relaxed);
}

/// 记录停止过程中被降级为日志的失败。
pub fn record_stop_failure() {
    metrics().stop_failures.fetch_add(1, Ordering::Relaxed);
}
