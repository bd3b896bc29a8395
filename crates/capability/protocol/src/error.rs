//! 协议错误类型定义

use domain::DomainError;

/// 协议层错误
///
/// 除停止服务端进程外，所有错误都原样返回给调用方。
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// 配置错误（mode/server 不一致、地址非法、标签表为空、类型未知）
    #[error("config error: {0}")]
    Config(String),

    /// 模拟服务端进程无法启动
    #[error("spawn error: {0}")]
    Spawn(String),

    #[error("tag not found: {0}")]
    TagNotFound(String),

    #[error("ambiguous tag: {0}")]
    AmbiguousTag(String),

    /// 向只读寄存器区（离散输入、输入寄存器）写入
    #[error("read-only bank: {0}")]
    ReadOnlyBank(String),

    /// 网络错误或超时
    #[error("connection error: {0}")]
    Connection(String),

    /// IO 错误（读取配置文件等）
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// 值无法用目标类型表示
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// EtherNet/IP 请求失败（CIP 状态错误等）
    #[error("enip error: {0}")]
    Enip(String),

    /// Modbus 请求失败（异常码等）
    #[error("modbus error: {0}")]
    Modbus(String),
}

impl From<DomainError> for ProtocolError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Config(message) => Self::Config(message),
            DomainError::InvalidAddress(message) => Self::Config(format!("invalid address: {}", message)),
            DomainError::InvalidKind(message) => Self::Config(format!("invalid tag kind: {}", message)),
            DomainError::TagNotFound(key) => Self::TagNotFound(key),
            DomainError::AmbiguousTag(name, count) => {
                Self::AmbiguousTag(format!("{} ({} instances, pass an instance id)", name, count))
            }
        }
    }
}
