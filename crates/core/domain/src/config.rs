//! 协议会话配置。
//!
//! ```json
//! {
//!   "name": "enip",
//!   "mode": 1,
//!   "server": {
//!     "address": "localhost:44818",
//!     "tags": [["SENSOR1", 1, "INT"], ["SENSOR1", 2, "INT"], ["ACTUATOR1", "INT"]]
//!   }
//! }
//! ```
//!
//! 纯客户端模式下 `server` 可以省略，或写成 `""`、`{}`、`null`。

use crate::address::Address;
use crate::descriptor::ServerDescriptor;
use crate::error::DomainError;
use crate::tag::TagSpec;
use serde::Deserialize;
use serde_json::Value;

/// 运行模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "u8")]
pub enum ProtocolMode {
    /// 仅客户端（0）
    Client,
    /// 客户端 + 内嵌模拟服务端（1）
    ClientAndServer,
}

impl TryFrom<u8> for ProtocolMode {
    type Error = DomainError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Client),
            1 => Ok(Self::ClientAndServer),
            other => Err(DomainError::Config(format!("unknown mode {}", other))),
        }
    }
}

impl From<ProtocolMode> for u8 {
    fn from(mode: ProtocolMode) -> Self {
        match mode {
            ProtocolMode::Client => 0,
            ProtocolMode::ClientAndServer => 1,
        }
    }
}

/// 协议会话的声明式描述。
///
/// 不变量：`ClientAndServer` 必须带服务端描述，`Client` 必须不带。
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawProtocolConfig")]
pub struct ProtocolConfig {
    name: String,
    mode: ProtocolMode,
    server: Option<ServerDescriptor>,
}

impl ProtocolConfig {
    pub fn new(
        name: impl Into<String>,
        mode: ProtocolMode,
        server: Option<ServerDescriptor>,
    ) -> Result<Self, DomainError> {
        let name = name.into().trim().to_ascii_lowercase();
        if name.is_empty() {
            return Err(DomainError::Config("protocol name must not be empty".to_string()));
        }
        match (mode, &server) {
            (ProtocolMode::Client, Some(server)) => {
                return Err(DomainError::Config(format!(
                    "client mode does not accept a server descriptor (got {})",
                    server.address()
                )));
            }
            (ProtocolMode::ClientAndServer, None) => {
                return Err(DomainError::Config(
                    "client+server mode requires a server descriptor".to_string(),
                ));
            }
            _ => {}
        }
        Ok(Self { name, mode, server })
    }

    /// 纯客户端配置。
    pub fn client(name: impl Into<String>) -> Result<Self, DomainError> {
        Self::new(name, ProtocolMode::Client, None)
    }

    /// 客户端 + 内嵌服务端配置。
    pub fn client_and_server(
        name: impl Into<String>,
        server: ServerDescriptor,
    ) -> Result<Self, DomainError> {
        Self::new(name, ProtocolMode::ClientAndServer, Some(server))
    }

    /// 从 JSON 文本解析并校验。
    pub fn from_json(json: &str) -> Result<Self, DomainError> {
        serde_json::from_str(json).map_err(|e| DomainError::Config(e.to_string()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> ProtocolMode {
        self.mode
    }

    pub fn server(&self) -> Option<&ServerDescriptor> {
        self.server.as_ref()
    }
}

#[derive(Debug, Deserialize)]
struct RawProtocolConfig {
    name: String,
    mode: ProtocolMode,
    #[serde(default)]
    server: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RawDescriptor {
    address: String,
    tags: Vec<TagSpec>,
}

impl TryFrom<RawProtocolConfig> for ProtocolConfig {
    type Error = DomainError;

    fn try_from(raw: RawProtocolConfig) -> Result<Self, Self::Error> {
        let server = match raw.server {
            None | Some(Value::Null) => None,
            Some(Value::String(text)) if text.trim().is_empty() => None,
            Some(Value::Object(map)) if map.is_empty() => None,
            Some(value @ Value::Object(_)) => Some(parse_descriptor(value)?),
            Some(other) => {
                return Err(DomainError::Config(format!(
                    "server must be an object, got {}",
                    other
                )));
            }
        };
        Self::new(raw.name, raw.mode, server)
    }
}

/// 逐字段解析，保留标签元组本身的错误信息。
fn parse_descriptor(value: Value) -> Result<ServerDescriptor, DomainError> {
    let raw: RawDescriptor = serde_json::from_value(value)
        .map_err(|e| DomainError::Config(format!("invalid server descriptor: {}", e)))?;
    let address: Address = raw.address.parse()?;
    ServerDescriptor::new(address, raw.tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_client_server() {
        let json = r#"{
            "name": "enip",
            "mode": 1,
            "server": {
                "address": "localhost:44818",
                "tags": [["SENSOR1", 1, "INT"], ["ACTUATOR1", "INT"]]
            }
        }"#;
        let config = ProtocolConfig::from_json(json).unwrap();
        assert_eq!(config.name(), "enip");
        assert_eq!(config.mode(), ProtocolMode::ClientAndServer);
        let server = config.server().unwrap();
        assert_eq!(server.address().to_string(), "localhost:44818");
        assert_eq!(
            server.tags(),
            &[
                TagSpec::with_instance("SENSOR1", 1, "INT"),
                TagSpec::new("ACTUATOR1", "INT"),
            ]
        );
    }

    #[test]
    fn test_parse_client_blank_server() {
        for server in [r#""""#, "{}", "null"] {
            let json = format!(r#"{{"name": "enip", "mode": 0, "server": {}}}"#, server);
            let config = ProtocolConfig::from_json(&json).unwrap();
            assert_eq!(config.mode(), ProtocolMode::Client);
            assert!(config.server().is_none());
        }
        let config = ProtocolConfig::from_json(r#"{"name": "modbus", "mode": 0}"#).unwrap();
        assert!(config.server().is_none());
    }

    #[test]
    fn test_reject_unknown_mode() {
        let err = ProtocolConfig::from_json(r#"{"name": "enip", "mode": 2}"#).unwrap_err();
        assert!(matches!(err, DomainError::Config(_)));
    }
}
