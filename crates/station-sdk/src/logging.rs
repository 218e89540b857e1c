//! 日志初始化

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// 安装全局 tracing 订阅者
///
/// - 过滤规则读取 `RUST_LOG`，缺省为 `info`
/// - `log` 宏的输出桥接到 tracing
///
/// 重复调用是空操作；宿主程序已安装订阅者时保留宿主的设置。
pub fn init_logger() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
        if tracing::subscriber::set_global_default(subscriber).is_err() {
            return;
        }
        // 失败说明已有 log 实现，忽略即可
        let _ = tracing_log::LogTracer::init();
    });
}
