//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::ObservabilityConfig;

/// 全局 Prometheus handle，用于渲染指标
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 和 `/health` 端点。
pub async fn init(config: &ObservabilityConfig) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    let _ = PROMETHEUS_HANDLE.set(handle.clone());

    register_common_metrics(&config.service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册业务指标描述
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!(
        "ledger_entries_total",
        "Total number of ledger entries written, by reason"
    );
    metrics::describe_counter!(
        "ledger_replays_total",
        "Ledger operations answered from an existing idempotency key"
    );
    metrics::describe_histogram!(
        "ledger_apply_duration_seconds",
        "Ledger apply duration in seconds"
    );

    metrics::describe_counter!(
        "redemptions_total",
        "Total number of redemption attempts, by kind and outcome"
    );

    metrics::describe_counter!("number_leases_total", "Total number of number lease attempts");

    metrics::describe_counter!("sms_polls_total", "Total number of SMS source polls");
    metrics::describe_counter!(
        "sms_new_messages_total",
        "Total number of newly recorded SMS messages"
    );

    metrics::describe_counter!(
        "rate_limited_total",
        "Requests rejected by the boundary rate limiter"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

/// 获取全局 Prometheus handle（用于自定义渲染）
pub fn get_handle() -> Option<&'static PrometheusHandle> {
    PROMETHEUS_HANDLE.get()
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录一次新写入的账本流水
#[inline]
pub fn record_ledger_entry(reason: &str, duration_secs: f64) {
    metrics::counter!("ledger_entries_total", "reason" => reason.to_string()).increment(1);
    metrics::histogram!("ledger_apply_duration_seconds", "reason" => reason.to_string())
        .record(duration_secs);
}

/// 记录一次幂等重放
#[inline]
pub fn record_ledger_replay(reason: &str) {
    metrics::counter!("ledger_replays_total", "reason" => reason.to_string()).increment(1);
}

/// 记录兑换结果
#[inline]
pub fn record_redemption(kind: &str, outcome: &str) {
    metrics::counter!(
        "redemptions_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录号码租用
#[inline]
pub fn record_number_lease(status: &str) {
    metrics::counter!("number_leases_total", "status" => status.to_string()).increment(1);
}

/// 记录短信拉取
#[inline]
pub fn record_sms_poll(source_available: bool, new_messages: u64) {
    metrics::counter!(
        "sms_polls_total",
        "source_available" => source_available.to_string()
    )
    .increment(1);
    metrics::counter!("sms_new_messages_total").increment(new_messages);
}

/// 记录被限流的请求
#[inline]
pub fn record_rate_limited(operation: &str) {
    metrics::counter!("rate_limited_total", "operation" => operation.to_string()).increment(1);
}
