//! # SSO 网关
//!
//! 在一个或多个上游服务前提供 OAuth2/JWT 单点登录的反向代理。

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use sso_gateway::{
    Gateway, GatewayError, Plugin, Result, SsoPlugin,
    config::load_config,
    logging,
    proxy::server,
};

/// 命令行参数
#[derive(Debug, Parser)]
#[command(name = "sso-gateway", version, about)]
struct Cli {
    /// TOML 配置文件路径
    #[arg(
        short,
        long,
        env = "SSO_GATEWAY_CONFIG",
        default_value = "config/gateway.toml"
    )]
    config: PathBuf,

    /// 基础日志级别，可被 RUST_LOG 覆盖
    #[arg(long, env = "SSO_GATEWAY_LOG_LEVEL")]
    log_level: Option<String>,

    /// 输出 JSON 日志而非紧凑格式
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.log_level.as_deref(), cli.json_logs);

    if let Err(err) = run(cli).await {
        error!(error = %err, "gateway failed");
        return Err(err);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(&cli.config)?;

    let address = config.server.address();
    let listener = TcpListener::bind(&address).await.map_err(|e| GatewayError::Io {
        message: format!("unable to bind {address}"),
        source: e,
    })?;
    let port = listener.local_addr()?.port();

    if let Some(oauth) = config.sso.oauth.as_mut() {
        oauth.bind_port(port);
    }

    let sso = SsoPlugin::new(&config.sso)?;
    let plugins: Vec<Arc<dyn Plugin>> = vec![Arc::new(sso)];
    let gateway = Arc::new(Gateway::new(&config, plugins)?);

    info!(
        port,
        targets = config.proxies.len(),
        "gateway starting"
    );
    server::serve(listener, gateway).await
}
