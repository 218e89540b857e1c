//! 单调时钟
//!
//! **App Start Relative Time Pattern**:
//! - 以进程内首次访问为锚点的单调时间
//! - 不受系统时钟调整（NTP、手动修改）影响
//! - 以 `i64` 微秒表示，可直接写入样本时间戳

use std::sync::OnceLock;
use std::time::Instant;

/// 全局时间锚点（首次访问时设置，之后不变）
static APP_START: OnceLock<Instant> = OnceLock::new();

/// 获取自锚点起的单调时间（微秒）
///
/// 返回值从 1 开始：`0` 及负数保留为无效时间戳（Validation 会判为 Bad）。
pub fn monotonic_micros() -> i64 {
    let start = APP_START.get_or_init(Instant::now);
    start.elapsed().as_micros() as i64 + 1
}
