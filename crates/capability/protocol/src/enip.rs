//! EtherNet/IP（CIP 符号标签）协议实现
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! let config = ProtocolConfig::from_json(r#"{
//!     "name": "enip",
//!     "mode": 1,
//!     "server": {"address": "localhost:44818",
//!                "tags": [["SENSOR1", 1, "INT"], ["SENSOR1", 2, "INT"], ["ACTUATOR1", "INT"]]}
//! }"#)?;
//! let mut enip = EnipProtocol::new(config)?;
//! enip.start_server()?;
//! let address = "localhost:44818".parse()?;
//! enip.send(&TagKey::with_instance("SENSOR1", 1), TagValue::Int(7), &address).await?;
//! let value = enip.receive(&TagKey::with_instance("SENSOR1", 1), &address).await?;
//! enip.stop_server().await;
//! ```

use crate::error::ProtocolError;
use crate::protocol::{Protocol, ProtocolCore};
use crate::server::{ServerCommand, TagStyle};
use crate::types::{ProtocolOptions, ServerProgram, TagValue, resolve_socket_addr, with_timeout};
use async_trait::async_trait;
use cps_telemetry::{record_receive, record_receive_failure, record_send, record_send_failure};
use domain::{Address, EnipType, ProtocolConfig, ProtocolMode, ServerDescriptor, TagKey};
use rust_ethernet_ip::{EipClient, PlcValue};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// 符号标签读写原语（由 EtherNet/IP 协议栈提供）。
#[async_trait]
pub trait TagClient: Send + Sync {
    async fn write_tag(
        &self,
        address: &Address,
        tag: &str,
        kind: EnipType,
        value: TagValue,
    ) -> Result<(), ProtocolError>;

    async fn read_tag(&self, address: &Address, tag: &str) -> Result<TagValue, ProtocolError>;
}

/// 基于 `rust-ethernet-ip` 的客户端：每次请求注册一个会话，结束后注销。
#[derive(Debug, Clone, Copy, Default)]
pub struct EipTagClient;

impl EipTagClient {
    async fn connect(address: &Address) -> Result<EipClient, ProtocolError> {
        let socket = resolve_socket_addr(address).await?;
        EipClient::connect(&socket.to_string())
            .await
            .map_err(|e| ProtocolError::Connection(format!("{}: {}", address, e)))
    }

    async fn close(client: &mut EipClient, address: &Address) {
        if let Err(e) = client.unregister_session().await {
            debug!(target: "cps.protocol", %address, error = %e, "failed to unregister enip session");
        }
    }
}

#[async_trait]
impl TagClient for EipTagClient {
    async fn write_tag(
        &self,
        address: &Address,
        tag: &str,
        kind: EnipType,
        value: TagValue,
    ) -> Result<(), ProtocolError> {
        let value = to_plc_value(kind, value)?;
        let mut client = Self::connect(address).await?;
        let result = client
            .write_tag(tag, value)
            .await
            .map_err(|e| ProtocolError::Enip(format!("write {}: {}", tag, e)));
        Self::close(&mut client, address).await;
        result
    }

    async fn read_tag(&self, address: &Address, tag: &str) -> Result<TagValue, ProtocolError> {
        let mut client = Self::connect(address).await?;
        let result = client
            .read_tag(tag)
            .await
            .map_err(|e| ProtocolError::Enip(format!("read {}: {}", tag, e)));
        Self::close(&mut client, address).await;
        from_plc_value(result?)
    }
}

/// EtherNet/IP 协议
pub struct EnipProtocol {
    core: ProtocolCore,
    /// 内嵌服务端标签的声明类型
    types: HashMap<TagKey, EnipType>,
    client: Arc<dyn TagClient>,
}

impl EnipProtocol {
    pub const NAMES: &'static [&'static str] = &["enip"];

    pub fn new(config: ProtocolConfig) -> Result<Self, ProtocolError> {
        Self::with_options(config, ProtocolOptions::default())
    }

    pub fn with_options(
        config: ProtocolConfig,
        options: ProtocolOptions,
    ) -> Result<Self, ProtocolError> {
        Self::with_client(config, options, Arc::new(EipTagClient))
    }

    /// 使用自定义标签客户端（如测试中的内存控制器）。
    pub fn with_client(
        config: ProtocolConfig,
        options: ProtocolOptions,
        client: Arc<dyn TagClient>,
    ) -> Result<Self, ProtocolError> {
        let core = ProtocolCore::new(config, options, Self::NAMES)?;
        let mut types = HashMap::new();
        if let Some(server) = core.server_descriptor() {
            for tag in server.tags() {
                types.insert(tag.key(), tag.kind().parse::<EnipType>()?);
            }
        }
        Ok(Self {
            core,
            types,
            client,
        })
    }

    /// 默认模拟服务端：cpppo 的 EtherNet/IP 服务端模块。
    pub fn default_program() -> ServerProgram {
        ServerProgram::new(
            "python3",
            vec!["-m".to_string(), "cpppo.server.enip".to_string()],
        )
    }

    /// 把键映射为线上的标签名和类型。
    ///
    /// 目标是自己的内嵌服务端时按描述解析；其他地址（包括纯客户端模式）上
    /// 键是不透明的远端标签名，类型由值推断。
    fn locate(
        &self,
        key: &TagKey,
        value: Option<&TagValue>,
        address: &Address,
    ) -> Result<(String, EnipType), ProtocolError> {
        match self.core.own_server(address) {
            Some(server) => {
                let tag = server.resolve(key)?;
                let key = tag.key();
                let kind = self
                    .types
                    .get(&key)
                    .copied()
                    .ok_or_else(|| ProtocolError::TagNotFound(key.to_string()))?;
                Ok((wire_name(&key), kind))
            }
            None => {
                if key.name().trim().is_empty() {
                    return Err(ProtocolError::TagNotFound(key.to_string()));
                }
                Ok((wire_name(key), value.map(infer_type).unwrap_or(EnipType::Int)))
            }
        }
    }
}

#[async_trait]
impl Protocol for EnipProtocol {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn mode(&self) -> ProtocolMode {
        self.core.mode()
    }

    fn server_descriptor(&self) -> Option<&ServerDescriptor> {
        self.core.server_descriptor()
    }

    fn start_command(&self) -> Result<ServerCommand, ProtocolError> {
        let server = self.core.require_server()?;
        let program = self.core.server_program(Self::default_program());
        Ok(ServerCommand::build(
            &program,
            server.address(),
            &["--print".to_string()],
            server.tags(),
            TagStyle::Assign,
        ))
    }

    fn start_server(&mut self) -> Result<(), ProtocolError> {
        let command = self.start_command()?;
        self.core.start_server(command)
    }

    async fn stop_server(&mut self) {
        self.core.stop_server().await
    }

    fn is_server_running(&mut self) -> bool {
        self.core.is_server_running()
    }

    async fn send(
        &self,
        key: &TagKey,
        value: TagValue,
        address: &Address,
    ) -> Result<(), ProtocolError> {
        let result: Result<(), ProtocolError> = async {
            let (tag, kind) = self.locate(key, Some(&value), address)?;
            check_value(kind, &value)?;
            debug!(target: "cps.protocol", %address, %tag, %kind, %value, "enip write");
            with_timeout(
                self.core.options().request_timeout(),
                address,
                self.client.write_tag(address, &tag, kind, value),
            )
            .await
        }
        .await;

        match &result {
            Ok(()) => record_send(),
            Err(e) => {
                record_send_failure();
                warn!(target: "cps.protocol", %address, %key, error = %e, "enip write failed");
            }
        }
        result
    }

    async fn receive(&self, key: &TagKey, address: &Address) -> Result<TagValue, ProtocolError> {
        let result: Result<TagValue, ProtocolError> = async {
            let (tag, _) = self.locate(key, None, address)?;
            let value = with_timeout(
                self.core.options().request_timeout(),
                address,
                self.client.read_tag(address, &tag),
            )
            .await?;
            debug!(target: "cps.protocol", %address, %tag, %value, "enip read");
            Ok(value)
        }
        .await;

        match &result {
            Ok(_) => record_receive(),
            Err(e) => {
                record_receive_failure();
                warn!(target: "cps.protocol", %address, %key, error = %e, "enip read failed");
            }
        }
        result
    }
}

/// 线上标签名：`NAME` 或 `NAME:instance`（模拟服务端的多键标签名）。
pub fn wire_name(key: &TagKey) -> String {
    match key.instance() {
        Some(instance) => format!("{}:{}", key.name(), instance),
        None => key.name().to_string(),
    }
}

fn infer_type(value: &TagValue) -> EnipType {
    match value {
        TagValue::Bool(_) => EnipType::Bool,
        TagValue::Real(_) => EnipType::Real,
        TagValue::Int(v) if i16::try_from(*v).is_ok() => EnipType::Int,
        TagValue::Int(_) => EnipType::Dint,
    }
}

/// 校验值能否用目标类型表示（在任何网络操作之前）。
pub fn check_value(kind: EnipType, value: &TagValue) -> Result<(), ProtocolError> {
    match (kind, value) {
        (EnipType::Bool, TagValue::Bool(_)) => Ok(()),
        (EnipType::Bool, TagValue::Int(0 | 1)) => Ok(()),
        (EnipType::Real, TagValue::Real(_) | TagValue::Int(_)) => Ok(()),
        (kind, TagValue::Int(v)) => match kind.int_range() {
            Some((min, max)) if (min..=max).contains(v) => Ok(()),
            _ => Err(ProtocolError::InvalidValue(format!("{} does not fit {}", v, kind))),
        },
        (kind, value) => Err(ProtocolError::InvalidValue(format!(
            "{} cannot be written to a {} tag",
            value, kind
        ))),
    }
}

fn to_plc_value(kind: EnipType, value: TagValue) -> Result<PlcValue, ProtocolError> {
    check_value(kind, &value)?;
    let plc = match (kind, value) {
        (EnipType::Bool, TagValue::Bool(v)) => PlcValue::Bool(v),
        (EnipType::Bool, TagValue::Int(v)) => PlcValue::Bool(v != 0),
        (EnipType::Real, TagValue::Real(v)) => PlcValue::Real(v as f32),
        (EnipType::Real, TagValue::Int(v)) => PlcValue::Real(v as f32),
        (EnipType::Sint, TagValue::Int(v)) => PlcValue::Sint(v as i8),
        (EnipType::Int, TagValue::Int(v)) => PlcValue::Int(v as i16),
        (EnipType::Dint, TagValue::Int(v)) => PlcValue::Dint(v as i32),
        (kind, value) => {
            return Err(ProtocolError::InvalidValue(format!(
                "{} cannot be written to a {} tag",
                value, kind
            )));
        }
    };
    Ok(plc)
}

fn from_plc_value(value: PlcValue) -> Result<TagValue, ProtocolError> {
    let value = match value {
        PlcValue::Bool(v) => TagValue::Bool(v),
        PlcValue::Sint(v) => TagValue::Int(v as i64),
        PlcValue::Int(v) => TagValue::Int(v as i64),
        PlcValue::Dint(v) => TagValue::Int(v as i64),
        PlcValue::Lint(v) => TagValue::Int(v),
        PlcValue::Usint(v) => TagValue::Int(v as i64),
        PlcValue::Uint(v) => TagValue::Int(v as i64),
        PlcValue::Udint(v) => TagValue::Int(v as i64),
        PlcValue::Real(v) => TagValue::Real(v as f64),
        PlcValue::Lreal(v) => TagValue::Real(v),
        other => {
            return Err(ProtocolError::Enip(format!(
                "unsupported tag value {:?}",
                other
            )));
        }
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_name() {
        assert_eq!(wire_name(&TagKey::with_instance("SENSOR1", 1)), "SENSOR1:1");
        assert_eq!(wire_name(&TagKey::new("ACTUATOR1")), "ACTUATOR1");
    }

    #[test]
    fn test_check_value() {
        assert!(check_value(EnipType::Int, &TagValue::Int(7)).is_ok());
        assert!(check_value(EnipType::Int, &TagValue::Int(70_000)).is_err());
        assert!(check_value(EnipType::Dint, &TagValue::Int(70_000)).is_ok());
        assert!(check_value(EnipType::Bool, &TagValue::Int(1)).is_ok());
        assert!(check_value(EnipType::Int, &TagValue::Real(1.5)).is_err());
        assert!(check_value(EnipType::Real, &TagValue::Real(1.5)).is_ok());
    }

    #[test]
    fn test_plc_value_conversion() {
        assert_eq!(
            to_plc_value(EnipType::Int, TagValue::Int(-3)).unwrap(),
            PlcValue::Int(-3)
        );
        assert_eq!(from_plc_value(PlcValue::Dint(42)).unwrap(), TagValue::Int(42));
        assert_eq!(from_plc_value(PlcValue::Bool(true)).unwrap(), TagValue::Bool(true));
    }

    #[test]
    fn test_infer_type() {
        assert_eq!(infer_type(&TagValue::Int(5)), EnipType::Int);
        assert_eq!(infer_type(&TagValue::Int(100_000)), EnipType::Dint);
        assert_eq!(infer_type(&TagValue::Bool(false)), EnipType::Bool);
    }
}
