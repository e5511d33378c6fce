//! 可观测性：tracing 订阅器初始化（仅由二进制入口调用）
//!
//! 默认级别 info，RUST_LOG 可覆盖；verbose 时提升到 debug。日志写 stderr，stdout 留给结果输出。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}
