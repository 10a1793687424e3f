//! # 交换计数

use axum::http::StatusCode;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// 请求、响应及各状态码计数
#[derive(Debug, Default)]
pub struct GatewayStats {
    requests: AtomicU64,
    responses: AtomicU64,
    statuses: DashMap<u16, u64>,
}

/// [`GatewayStats`] 的快照
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub responses: u64,
    pub statuses: BTreeMap<u16, u64>,
}

impl GatewayStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    /// 按客户端将看到的状态码统计上游响应。
    pub fn record_response(&self, status: StatusCode) {
        self.responses.fetch_add(1, Ordering::Relaxed);
        *self.statuses.entry(status.as_u16()).or_insert(0) += 1;
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            responses: self.responses.load(Ordering::Relaxed),
            statuses: self
                .statuses
                .iter()
                .map(|entry| (*entry.key(), *entry.value()))
                .collect(),
        }
    }
}
