//! # 日志配置
//!
//! 进程唯一的 `tracing` subscriber。`RUST_LOG` 优先于命令行级别。

use std::env;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// 未设置 `RUST_LOG` 时的过滤器。
#[must_use]
pub fn default_filter(level: Option<&str>) -> String {
    let level = level.unwrap_or("info");
    format!("{level},sso_gateway=debug,hyper=warn,reqwest=warn")
}

/// 安装全局 subscriber。`json` 为真时输出逐行 JSON 而非紧凑格式。
pub fn init_logging(level: Option<&str>, json: bool) {
    let filter = env::var("RUST_LOG").unwrap_or_else(|_| default_filter(level));

    let compact = (!json).then(|| {
        fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
    });
    let structured = json.then(|| fmt::layer().json().with_current_span(false));

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&filter).unwrap_or_else(|_| EnvFilter::new(default_filter(None))))
        .with(compact)
        .with(structured)
        .init();

    tracing::debug!(filter = %filter, json, "logging initialised");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter() {
        assert_eq!(
            default_filter(Some("warn")),
            "warn,sso_gateway=debug,hyper=warn,reqwest=warn"
        );
        assert!(default_filter(None).starts_with("info,"));
    }
}
