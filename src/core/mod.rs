//! 核心层：错误类型与共享常量

pub mod consts;
pub mod error;

pub use error::{FlowError, FlowResult};

/// 当前 UTC 时间（毫秒），用于 last_modified
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
