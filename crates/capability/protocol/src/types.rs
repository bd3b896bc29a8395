//! 协议相关类型定义

use crate::error::ProtocolError;
use domain::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

/// 标签/寄存器的值。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Bool(bool),
    Int(i64),
    Real(f64),
}

impl TagValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Bool(value) => Some(*value as i64),
            Self::Real(_) => None,
        }
    }
}

impl From<bool> for TagValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for TagValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for TagValue {
    fn from(value: i32) -> Self {
        Self::Int(value as i64)
    }
}

impl From<u16> for TagValue {
    fn from(value: u16) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for TagValue {
    fn from(value: f64) -> Self {
        Self::Real(value)
    }
}

impl fmt::Display for TagValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{}", value),
            Self::Int(value) => write!(f, "{}", value),
            Self::Real(value) => write!(f, "{}", value),
        }
    }
}

/// 模拟服务端可执行程序及其固定前缀参数。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerProgram {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ServerProgram {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// 按空白切分命令行，如 `python3 -m cpppo.server.enip`。
    pub fn parse(command_line: &str) -> Option<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self::new(program, parts.collect()))
    }
}

/// 协议运行参数
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolOptions {
    /// 单次读写超时（毫秒），含建连
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// 停止服务端时等待优雅退出的时间（毫秒）
    #[serde(default = "default_stop_grace")]
    pub stop_grace_ms: u64,
    /// 覆盖默认的模拟服务端程序
    #[serde(default)]
    pub server_program: Option<ServerProgram>,
    /// Modbus 从站 ID（不设置时使用 TCP 默认值）
    #[serde(default)]
    pub unit_id: Option<u8>,
}

fn default_request_timeout() -> u64 {
    3000
}

fn default_stop_grace() -> u64 {
    2000
}

impl Default for ProtocolOptions {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout(),
            stop_grace_ms: default_stop_grace(),
            server_program: None,
            unit_id: None,
        }
    }
}

impl ProtocolOptions {
    /// 从 JSON 配置字符串解析
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(json).map_err(|e| ProtocolError::Config(e.to_string()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// 在超时内执行一次请求；超时视为连接错误。
pub(crate) async fn with_timeout<T, F>(
    limit: Duration,
    address: &Address,
    request: F,
) -> Result<T, ProtocolError>
where
    F: Future<Output = Result<T, ProtocolError>>,
{
    match tokio::time::timeout(limit, request).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Connection(format!(
            "{} timed out after {}ms",
            address,
            limit.as_millis()
        ))),
    }
}

/// 解析主机名，取第一个可用的套接字地址。
pub(crate) async fn resolve_socket_addr(address: &Address) -> Result<SocketAddr, ProtocolError> {
    let mut addrs = tokio::net::lookup_host((address.host(), address.port()))
        .await
        .map_err(|e| ProtocolError::Connection(format!("resolve {}: {}", address, e)))?;
    addrs
        .next()
        .ok_or_else(|| ProtocolError::Connection(format!("no address for {}", address)))
}
