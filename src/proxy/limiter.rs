//! # 连接上限
//!
//! 统计进行中的交换。槽位由 [`ConnectionPermit`] 持有，
//! 许可销毁时归还；无论交换以何种方式结束，都只归还一次。

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// 带可选上限的共享计数器
#[derive(Debug)]
pub struct ConnectionGate {
    limit: Option<usize>,
    open: AtomicUsize,
}

impl ConnectionGate {
    /// `None` 表示不限制。
    #[must_use]
    pub const fn new(limit: Option<usize>) -> Self {
        Self {
            limit,
            open: AtomicUsize::new(0),
        }
    }

    /// 占用一个槽位，达到上限时返回 `None`。
    #[must_use]
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionPermit> {
        let limit = self.limit.unwrap_or(usize::MAX);
        self.open
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |open| {
                (open < limit).then_some(open + 1)
            })
            .ok()
            .map(|_| ConnectionPermit {
                gate: Arc::clone(self),
            })
    }

    /// 当前占用槽位的交换数。
    #[must_use]
    pub fn open_connections(&self) -> usize {
        self.open.load(Ordering::Acquire)
    }

    #[must_use]
    pub const fn limit(&self) -> Option<usize> {
        self.limit
    }
}

/// 一次已准入的交换，销毁即释放槽位。
#[derive(Debug)]
pub struct ConnectionPermit {
    gate: Arc<ConnectionGate>,
}

impl Drop for ConnectionPermit {
    fn drop(&mut self) {
        self.gate.open.fetch_sub(1, Ordering::AcqRel);
    }
}
