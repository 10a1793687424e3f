//! # 插件管道引擎
//!
//! 反向代理核心：将客户端请求路由到上游目标，
//! 并在整个交换过程（包括消息体数据块）中为有序的 [`Plugin`] 列表提供钩子。

mod body;
pub mod context;
mod forwarding;
pub mod limiter;
pub mod pipeline;
pub mod plugin;
pub mod server;
pub mod service;
pub mod stats;
pub mod target;

pub use context::{ClientResponse, RequestContext, UpstreamResponse};
pub use limiter::{ConnectionGate, ConnectionPermit};
pub use pipeline::{Leg, PluginChain};
pub use plugin::{Phase, Plugin, Traversal};
pub use service::Gateway;
pub use stats::{GatewayStats, StatsSnapshot};
pub use target::{ProxyTarget, RouteTable};
