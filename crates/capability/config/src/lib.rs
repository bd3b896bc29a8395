//! 测试床运行配置加载。

use std::env;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 启动后的探测读写（写入后立即读回）。
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    pub tag: String,
    pub instance: Option<u32>,
    /// JSON 字面量（`7`、`true`、`1.5`）；不设置时只读
    pub value: Option<String>,
    /// 目标地址；不设置时使用内嵌服务端地址
    pub address: Option<String>,
}

/// 测试床运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 协议配置文件（JSON）路径
    pub protocol_config_path: String,
    /// 覆盖 EtherNet/IP 模拟服务端命令行
    pub enip_server: Option<String>,
    /// 覆盖 Modbus 模拟服务端命令行
    pub modbus_server: Option<String>,
    pub request_timeout_ms: u64,
    pub stop_grace_ms: u64,
    /// 启动服务端后等待其监听端口的时间
    pub startup_delay_ms: u64,
    pub modbus_unit_id: Option<u8>,
    pub probe: Option<ProbeConfig>,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let protocol_config_path = read_optional("CPS_PROTOCOL_CONFIG")
            .ok_or_else(|| ConfigError::Missing("CPS_PROTOCOL_CONFIG".to_string()))?;
        let enip_server = read_optional("CPS_ENIP_SERVER");
        let modbus_server = read_optional("CPS_MODBUS_SERVER");
        let request_timeout_ms = read_u64_with_default("CPS_REQUEST_TIMEOUT_MS", 3000)?;
        if request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "CPS_REQUEST_TIMEOUT_MS".to_string(),
                "0".to_string(),
            ));
        }
        let stop_grace_ms = read_u64_with_default("CPS_STOP_GRACE_MS", 2000)?;
        let startup_delay_ms = read_u64_with_default("CPS_STARTUP_DELAY_MS", 1000)?;
        let modbus_unit_id = read_optional_u8("CPS_MODBUS_UNIT_ID")?;
        let probe = match read_optional("CPS_PROBE_TAG") {
            Some(tag) => Some(ProbeConfig {
                tag,
                instance: read_optional_u32("CPS_PROBE_INSTANCE")?,
                value: read_optional("CPS_PROBE_VALUE"),
                address: read_optional("CPS_PROBE_ADDRESS"),
            }),
            None => None,
        };

        Ok(Self {
            protocol_config_path,
            enip_server,
            modbus_server,
            request_timeout_ms,
            stop_grace_ms,
            startup_delay_ms,
            modbus_unit_id,
            probe,
        })
    }

    /// 按协议名称选择服务端命令行覆盖。
    pub fn server_override(&self, protocol: &str) -> Option<&str> {
        match protocol {
            "enip" => self.enip_server.as_deref(),
            "modbus" | "modbustcp" => self.modbus_server.as_deref(),
            _ => None,
        }
    }
}

fn read_u64_with_default(key: &str, default: u64) -> Result<u64, ConfigError> {
    let value = match read_optional(key) {
        Some(value) => value,
        None => return Ok(default),
    };
    value
        .parse::<u64>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

fn read_optional_u8(key: &str) -> Result<Option<u8>, ConfigError> {
    read_optional(key)
        .map(|value| {
            value
                .parse::<u8>()
                .map_err(|_| ConfigError::Invalid(key.to_string(), value))
        })
        .transpose()
}

fn read_optional_u32(key: &str) -> Result<Option<u32>, ConfigError> {
    read_optional(key)
        .map(|value| {
            value
                .parse::<u32>()
                .map_err(|_| ConfigError::Invalid(key.to_string(), value))
        })
        .transpose()
}
