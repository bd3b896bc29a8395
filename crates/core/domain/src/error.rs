//! 领域错误类型

/// 配置解析与标签解析错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomainError {
    /// 协议配置不合法（mode/server 不一致、标签表为空等）
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid tag kind: {0}")]
    InvalidKind(String),

    #[error("tag not found: {0}")]
    TagNotFound(String),

    /// 省略实例号时同名标签不唯一
    #[error("ambiguous tag {0}: {1} instances share this name")]
    AmbiguousTag(String, usize),
}
