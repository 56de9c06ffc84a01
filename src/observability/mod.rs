//! 可观测性：tracing 日志初始化
//!
//! 默认级别 info，`RUST_LOG` 可覆盖（如 `RUST_LOG=lexio=debug` 查看每一段流式内容）。
//! 日志写到 stderr，stdout 留给交互输出。

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .init();
}
