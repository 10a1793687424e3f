//! # 插件链
//!
//! 按阶段的遍历顺序依次在已注册插件上运行一个钩子阶段。
//! 钩子失败会中止该阶段剩余部分，钩子 panic 会转为内部错误。

use bytes::Bytes;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{debug, error};

use super::context::{ClientResponse, RequestContext, UpstreamResponse};
use super::plugin::{Phase, Plugin, Traversal};
use crate::error::{GatewayError, Result};

/// 数据、结束、关闭或错误链所属的消息体方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leg {
    /// 流向上游的客户端消息体
    Request,
    /// 流向客户端的上游消息体
    Response,
}

impl Leg {
    const fn data_phase(self) -> Phase {
        match self {
            Self::Request => Phase::RequestData,
            Self::Response => Phase::ResponseData,
        }
    }

    const fn end_phase(self) -> Phase {
        match self {
            Self::Request => Phase::RequestEnd,
            Self::Response => Phase::ResponseEnd,
        }
    }

    const fn close_phase(self) -> Phase {
        match self {
            Self::Request => Phase::RequestClose,
            Self::Response => Phase::ResponseClose,
        }
    }

    const fn error_phase(self) -> Phase {
        match self {
            Self::Request => Phase::RequestError,
            Self::Response => Phase::ResponseError,
        }
    }
}

/// 所有交换共享的有序只读插件列表。
#[derive(Clone, Default)]
pub struct PluginChain {
    plugins: Arc<[Arc<dyn Plugin>]>,
}

impl std::fmt::Debug for PluginChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.plugins.iter().map(|p| p.name()))
            .finish()
    }
}

impl PluginChain {
    #[must_use]
    pub fn new(plugins: Vec<Arc<dyn Plugin>>) -> Self {
        Self {
            plugins: plugins.into(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    fn ordered(&self, phase: Phase) -> Box<dyn Iterator<Item = &Arc<dyn Plugin>> + Send + '_> {
        match phase.traversal() {
            Traversal::Forward => Box::new(self.plugins.iter()),
            Traversal::Reverse => Box::new(self.plugins.iter().rev()),
        }
    }

    /// 按注册顺序运行 `onrequest`，插件结束响应后提前停止。
    pub async fn run_request(&self, req: &mut RequestContext, res: &mut ClientResponse) -> Result<()> {
        let correlation_id = req.correlation_id;
        for plugin in self.ordered(Phase::Request) {
            guarded(
                plugin.as_ref(),
                Phase::Request,
                correlation_id,
                plugin.on_request(req, res),
            )
            .await?;

            if res.is_finished() {
                debug!(correlation_id, plugin = plugin.name(), "response ended in onrequest");
                break;
            }
        }
        Ok(())
    }

    /// 按注册逆序运行 `onresponse`，插件结束响应后提前停止。
    pub async fn run_response(
        &self,
        req: &RequestContext,
        res: &mut ClientResponse,
        upstream: &mut UpstreamResponse,
    ) -> Result<()> {
        for plugin in self.ordered(Phase::Response) {
            guarded(
                plugin.as_ref(),
                Phase::Response,
                req.correlation_id,
                plugin.on_response(req, res, upstream),
            )
            .await?;

            if res.is_finished() {
                debug!(
                    correlation_id = req.correlation_id,
                    plugin = plugin.name(),
                    "response ended in onresponse"
                );
                break;
            }
        }
        Ok(())
    }

    /// 让一个数据块依次经过 `leg` 的所有数据钩子。插件返回 `None` 即丢弃该数据块。
    pub async fn run_data(&self, leg: Leg, req: &RequestContext, chunk: Bytes) -> Result<Option<Bytes>> {
        let phase = leg.data_phase();
        let mut current = chunk;
        for plugin in self.ordered(phase) {
            let hook = match leg {
                Leg::Request => plugin.on_request_data(req, current),
                Leg::Response => plugin.on_response_data(req, current),
            };
            match guarded(plugin.as_ref(), phase, req.correlation_id, hook).await? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// 以空数据块为起点运行 `leg` 的结束钩子。每个插件都会运行，最终数据块非空时返回。
    pub async fn run_end(&self, leg: Leg, req: &RequestContext) -> Result<Option<Bytes>> {
        let phase = leg.end_phase();
        let mut current = Bytes::new();
        for plugin in self.ordered(phase) {
            let hook = match leg {
                Leg::Request => plugin.on_request_end(req, current),
                Leg::Response => plugin.on_response_end(req, current),
            };
            current = guarded(plugin.as_ref(), phase, req.correlation_id, hook)
                .await?
                .unwrap_or_default();
        }
        Ok((!current.is_empty()).then_some(current))
    }

    pub async fn run_close(&self, leg: Leg, req: &RequestContext) -> Result<()> {
        let phase = leg.close_phase();
        for plugin in self.ordered(phase) {
            let hook = match leg {
                Leg::Request => plugin.on_request_close(req),
                Leg::Response => plugin.on_response_close(req),
            };
            guarded(plugin.as_ref(), phase, req.correlation_id, hook).await?;
        }
        Ok(())
    }

    pub async fn run_error(&self, leg: Leg, req: &RequestContext, err: &GatewayError) -> Result<()> {
        let phase = leg.error_phase();
        for plugin in self.ordered(phase) {
            let hook = match leg {
                Leg::Request => plugin.on_request_error(req, err),
                Leg::Response => plugin.on_response_error(req, err),
            };
            guarded(plugin.as_ref(), phase, req.correlation_id, hook).await?;
        }
        Ok(())
    }
}

async fn guarded<T>(
    plugin: &dyn Plugin,
    phase: Phase,
    correlation_id: u64,
    hook: impl Future<Output = Result<T>>,
) -> Result<T> {
    match AssertUnwindSafe(hook).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            debug!(correlation_id, plugin = plugin.name(), %phase, error = %err, "hook failed");
            Err(err)
        }
        Err(panic) => {
            let reason = panic_message(panic.as_ref());
            error!(correlation_id, plugin = plugin.name(), %phase, reason, "hook panicked");
            Err(GatewayError::internal(format!(
                "plugin {} failed in {phase}",
                plugin.name()
            )))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}
