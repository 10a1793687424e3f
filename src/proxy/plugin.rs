//! # 插件钩子约定
//!
//! 插件可实现以下钩子的任意子集；默认实现原样透传，未实现的钩子不产生影响。

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;

use super::context::{ClientResponse, RequestContext, UpstreamResponse};
use crate::error::{GatewayError, Result};

/// 引擎在每次交换中调用的生命周期钩子。
///
/// 请求侧钩子按注册顺序运行。响应、响应数据、响应结束和响应错误钩子按注册逆序运行，
/// 最外层插件最先看到上游应答。见 [`Phase::traversal`]。
#[async_trait]
pub trait Plugin: Send + Sync {
    /// 日志中使用的名称。
    fn name(&self) -> &str;

    /// 在发往上游之前检查或改写入站请求。
    /// 结束 `res` 即直接应答客户端。
    async fn on_request(&self, _req: &mut RequestContext, _res: &mut ClientResponse) -> Result<()> {
        Ok(())
    }

    /// 转换一个请求数据块，`None` 表示丢弃。
    async fn on_request_data(&self, _req: &RequestContext, chunk: Bytes) -> Result<Option<Bytes>> {
        Ok(Some(chunk))
    }

    /// 输出最后的请求数据块，以空数据块为起点。
    async fn on_request_end(&self, _req: &RequestContext, tail: Bytes) -> Result<Option<Bytes>> {
        Ok(Some(tail))
    }

    async fn on_request_close(&self, _req: &RequestContext) -> Result<()> {
        Ok(())
    }

    async fn on_request_error(&self, _req: &RequestContext, _err: &GatewayError) -> Result<()> {
        Ok(())
    }

    /// 检查或改写上游响应头部。结束 `res` 会替换上游应答，其消息体随后被丢弃。
    async fn on_response(
        &self,
        _req: &RequestContext,
        _res: &mut ClientResponse,
        _upstream: &mut UpstreamResponse,
    ) -> Result<()> {
        Ok(())
    }

    /// 转换一个响应数据块，`None` 表示丢弃。
    async fn on_response_data(&self, _req: &RequestContext, chunk: Bytes) -> Result<Option<Bytes>> {
        Ok(Some(chunk))
    }

    /// 输出最后的响应数据块，以空数据块为起点。
    async fn on_response_end(&self, _req: &RequestContext, tail: Bytes) -> Result<Option<Bytes>> {
        Ok(Some(tail))
    }

    async fn on_response_close(&self, _req: &RequestContext) -> Result<()> {
        Ok(())
    }

    async fn on_response_error(&self, _req: &RequestContext, _err: &GatewayError) -> Result<()> {
        Ok(())
    }
}

/// 钩子链遍历插件列表的方向。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Traversal {
    /// 注册顺序
    Forward,
    /// 注册逆序，最外层插件优先
    Reverse,
}

/// 单次交换的钩子阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Request,
    RequestData,
    RequestEnd,
    RequestClose,
    RequestError,
    Response,
    ResponseData,
    ResponseEnd,
    ResponseClose,
    ResponseError,
}

impl Phase {
    /// 洋葱模型：请求方向正序，响应方向逆序。响应关闭只做清理，按正序执行。
    #[must_use]
    pub const fn traversal(self) -> Traversal {
        match self {
            Self::Request
            | Self::RequestData
            | Self::RequestEnd
            | Self::RequestClose
            | Self::RequestError
            | Self::ResponseClose => Traversal::Forward,
            Self::Response | Self::ResponseData | Self::ResponseEnd | Self::ResponseError => {
                Traversal::Reverse
            }
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Request => "onrequest",
            Self::RequestData => "ondata_request",
            Self::RequestEnd => "onend_request",
            Self::RequestClose => "onclose_request",
            Self::RequestError => "onerror_request",
            Self::Response => "onresponse",
            Self::ResponseData => "ondata_response",
            Self::ResponseEnd => "onend_response",
            Self::ResponseClose => "onclose_response",
            Self::ResponseError => "onerror_response",
        };
        f.write_str(name)
    }
}
