//! Modbus TCP（寄存器区）协议实现
//!
//! Modbus 没有符号命名空间，只有四个互不相交的地址空间：线圈、离散输入、
//! 保持寄存器、输入寄存器。每个标签按其类型落入其中一个区，区内偏移等于
//! 它在同区标签中的声明顺序（从 0 开始）：
//!
//! ```text
//! [("HR1", 1, "HR"), ("CO1", 1, "CO"), ("HR2", 2, "HR")]
//!   HR1 -> HR[0]      CO1 -> CO[0]       HR2 -> HR[1]
//! ```
//!
//! 同名不同实例的标签占用同一区内的两个不同偏移。

use crate::error::ProtocolError;
use crate::protocol::{Protocol, ProtocolCore};
use crate::server::{ServerCommand, TagStyle};
use crate::types::{ProtocolOptions, ServerProgram, TagValue, resolve_socket_addr, with_timeout};
use async_trait::async_trait;
use cps_telemetry::{record_receive, record_receive_failure, record_send, record_send_failure};
use domain::{
    Address, ProtocolConfig, ProtocolMode, RegisterBank, ServerDescriptor, TagKey, TagSpec,
    resolve_tag, validate_tags,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio_modbus::prelude::*;
use tracing::{debug, warn};

/// 寄存器区 + 区内偏移。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterRef {
    pub bank: RegisterBank,
    pub offset: u16,
}

impl RegisterRef {
    pub fn new(bank: RegisterBank, offset: u16) -> Self {
        Self { bank, offset }
    }
}

impl fmt::Display for RegisterRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.bank, self.offset)
    }
}

/// 标签到寄存器的映射表。
#[derive(Debug, Clone)]
pub struct RegisterMap {
    tags: Vec<TagSpec>,
    refs: HashMap<TagKey, RegisterRef>,
    sizes: HashMap<RegisterBank, u16>,
}

impl RegisterMap {
    /// 按声明顺序为每个区分配偏移。
    pub fn build(tags: &[TagSpec]) -> Result<Self, ProtocolError> {
        validate_tags(tags)?;
        let mut refs = HashMap::new();
        let mut sizes: HashMap<RegisterBank, u16> = HashMap::new();
        for tag in tags {
            let bank = tag.kind().parse::<RegisterBank>()?;
            let next = sizes.entry(bank).or_insert(0);
            let offset = *next;
            *next = next.checked_add(1).ok_or_else(|| {
                ProtocolError::Config(format!("too many {} registers", bank))
            })?;
            refs.insert(tag.key(), RegisterRef::new(bank, offset));
        }
        Ok(Self {
            tags: tags.to_vec(),
            refs,
            sizes,
        })
    }

    /// 解析键并返回寄存器位置。
    pub fn locate(&self, key: &TagKey) -> Result<RegisterRef, ProtocolError> {
        let tag = resolve_tag(&self.tags, key)?;
        self.refs
            .get(&tag.key())
            .copied()
            .ok_or_else(|| ProtocolError::TagNotFound(key.to_string()))
    }

    /// 某个区声明的寄存器数量。
    pub fn bank_size(&self, bank: RegisterBank) -> u16 {
        self.sizes.get(&bank).copied().unwrap_or(0)
    }

    pub fn tags(&self) -> &[TagSpec] {
        &self.tags
    }
}

/// 单个寄存器的读写原语（由 Modbus 协议栈提供）。
///
/// 写入时值已校验为对应区的原生类型：位区为 `Bool`，字区为 `Int`（0-65535）。
#[async_trait]
pub trait RegisterClient: Send + Sync {
    async fn write(
        &self,
        address: &Address,
        register: RegisterRef,
        value: TagValue,
    ) -> Result<(), ProtocolError>;

    async fn read(&self, address: &Address, register: RegisterRef)
        -> Result<TagValue, ProtocolError>;
}

/// 基于 `tokio-modbus` 的 TCP 客户端：每次请求建立一个连接。
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpRegisterClient {
    unit_id: Option<u8>,
}

impl TcpRegisterClient {
    pub fn new(unit_id: Option<u8>) -> Self {
        Self { unit_id }
    }

    async fn connect(
        &self,
        address: &Address,
    ) -> Result<tokio_modbus::client::Context, ProtocolError> {
        let socket = resolve_socket_addr(address).await?;
        let mut ctx = tcp::connect(socket)
            .await
            .map_err(|e| ProtocolError::Connection(format!("{}: {}", address, e)))?;
        if let Some(unit_id) = self.unit_id {
            ctx.set_slave(Slave(unit_id));
        }
        Ok(ctx)
    }
}

#[async_trait]
impl RegisterClient for TcpRegisterClient {
    async fn write(
        &self,
        address: &Address,
        register: RegisterRef,
        value: TagValue,
    ) -> Result<(), ProtocolError> {
        let mut ctx = self.connect(address).await?;
        match (register.bank, value) {
            (RegisterBank::Coil, TagValue::Bool(bit)) => {
                ctx.write_single_coil(register.offset, bit)
                    .await
                    .map_err(|e| ProtocolError::Modbus(e.to_string()))?
                    .map_err(|e| ProtocolError::Modbus(format!("exception: {:?}", e)))?;
            }
            (RegisterBank::HoldingRegister, TagValue::Int(word)) => {
                let word = u16::try_from(word).map_err(|_| {
                    ProtocolError::InvalidValue(format!("{} is not a register word", word))
                })?;
                ctx.write_single_register(register.offset, word)
                    .await
                    .map_err(|e| ProtocolError::Modbus(e.to_string()))?
                    .map_err(|e| ProtocolError::Modbus(format!("exception: {:?}", e)))?;
            }
            (bank, value) if !bank.is_writable() => {
                return Err(ProtocolError::ReadOnlyBank(format!(
                    "{} cannot be written with {}",
                    register, value
                )));
            }
            (_, value) => {
                return Err(ProtocolError::InvalidValue(format!(
                    "{} cannot be written to {}",
                    value, register
                )));
            }
        }
        Ok(())
    }

    async fn read(
        &self,
        address: &Address,
        register: RegisterRef,
    ) -> Result<TagValue, ProtocolError> {
        let mut ctx = self.connect(address).await?;
        let value = match register.bank {
            RegisterBank::Coil => {
                let bits = ctx
                    .read_coils(register.offset, 1)
                    .await
                    .map_err(|e| ProtocolError::Modbus(e.to_string()))?
                    .map_err(|e| ProtocolError::Modbus(format!("exception: {:?}", e)))?;
                first_bit(bits, register)?
            }
            RegisterBank::DiscreteInput => {
                let bits = ctx
                    .read_discrete_inputs(register.offset, 1)
                    .await
                    .map_err(|e| ProtocolError::Modbus(e.to_string()))?
                    .map_err(|e| ProtocolError::Modbus(format!("exception: {:?}", e)))?;
                first_bit(bits, register)?
            }
            RegisterBank::HoldingRegister => {
                let words = ctx
                    .read_holding_registers(register.offset, 1)
                    .await
                    .map_err(|e| ProtocolError::Modbus(e.to_string()))?
                    .map_err(|e| ProtocolError::Modbus(format!("exception: {:?}", e)))?;
                first_word(words, register)?
            }
            RegisterBank::InputRegister => {
                let words = ctx
                    .read_input_registers(register.offset, 1)
                    .await
                    .map_err(|e| ProtocolError::Modbus(e.to_string()))?
                    .map_err(|e| ProtocolError::Modbus(format!("exception: {:?}", e)))?;
                first_word(words, register)?
            }
        };
        Ok(value)
    }
}

fn first_bit(bits: Vec<bool>, register: RegisterRef) -> Result<TagValue, ProtocolError> {
    bits.first()
        .copied()
        .map(TagValue::Bool)
        .ok_or_else(|| ProtocolError::Modbus(format!("empty response for {}", register)))
}

fn first_word(words: Vec<u16>, register: RegisterRef) -> Result<TagValue, ProtocolError> {
    words
        .first()
        .copied()
        .map(TagValue::from)
        .ok_or_else(|| ProtocolError::Modbus(format!("empty response for {}", register)))
}

/// 校验值是否为寄存器区的原生类型：位区只接受布尔值，字区只接受 0..=65535。
///
/// 读回时得到同一个值，因此不做有损转换（负数、0/1 与布尔互转都拒绝）。
pub fn encode_value(bank: RegisterBank, value: TagValue) -> Result<TagValue, ProtocolError> {
    match (bank.is_bit(), value) {
        (true, TagValue::Bool(bit)) => Ok(TagValue::Bool(bit)),
        (false, TagValue::Int(v)) if (0..=(u16::MAX as i64)).contains(&v) => Ok(TagValue::Int(v)),
        (_, value) => Err(ProtocolError::InvalidValue(format!(
            "{} does not fit a {} register",
            value, bank
        ))),
    }
}

/// Modbus TCP 协议
pub struct ModbusProtocol {
    core: ProtocolCore,
    /// 内嵌服务端的寄存器布局
    registers: Option<RegisterMap>,
    /// 指定远端从站的寄存器布局
    peers: HashMap<Address, RegisterMap>,
    /// 其余远端地址共用的寄存器布局
    remote: Option<RegisterMap>,
    client: Arc<dyn RegisterClient>,
}

impl ModbusProtocol {
    pub const NAMES: &'static [&'static str] = &["modbus", "modbustcp"];

    pub fn new(config: ProtocolConfig) -> Result<Self, ProtocolError> {
        Self::with_options(config, ProtocolOptions::default())
    }

    pub fn with_options(
        config: ProtocolConfig,
        options: ProtocolOptions,
    ) -> Result<Self, ProtocolError> {
        let client = Arc::new(TcpRegisterClient::new(options.unit_id));
        Self::with_client(config, options, client)
    }

    /// 使用自定义寄存器客户端（如测试中的内存从站）。
    pub fn with_client(
        config: ProtocolConfig,
        options: ProtocolOptions,
        client: Arc<dyn RegisterClient>,
    ) -> Result<Self, ProtocolError> {
        let core = ProtocolCore::new(config, options, Self::NAMES)?;
        let registers = core
            .server_descriptor()
            .map(|server| RegisterMap::build(server.tags()))
            .transpose()?;
        Ok(Self {
            core,
            registers,
            peers: HashMap::new(),
            remote: None,
            client,
        })
    }

    /// 提供远端从站的标签表，使 (name, instance) 键在任意远端地址上可用。
    ///
    /// 自己的内嵌服务端始终使用描述生成的布局。
    pub fn with_register_map(mut self, tags: &[TagSpec]) -> Result<Self, ProtocolError> {
        self.remote = Some(RegisterMap::build(tags)?);
        Ok(self)
    }

    /// 为某个远端从站单独提供标签表，优先于 [`Self::with_register_map`]。
    pub fn with_peer_register_map(
        mut self,
        address: Address,
        tags: &[TagSpec],
    ) -> Result<Self, ProtocolError> {
        if self.core.own_server(&address).is_some() {
            return Err(ProtocolError::Config(format!(
                "{} is the embedded server, its layout comes from the descriptor",
                address
            )));
        }
        self.peers.insert(address, RegisterMap::build(tags)?);
        Ok(self)
    }

    /// 发往 `address` 的请求所用的寄存器布局。
    pub fn register_map(&self, address: &Address) -> Option<&RegisterMap> {
        if self.core.own_server(address).is_some() {
            return self.registers.as_ref();
        }
        self.peers.get(address).or(self.remote.as_ref())
    }

    /// 默认模拟服务端：minicps 的 pymodbus 服务端模块。
    pub fn default_program() -> ServerProgram {
        ServerProgram::new(
            "python3",
            vec!["-m".to_string(), "minicps.pymodbus.servers".to_string()],
        )
    }

    /// 解析键在 `address` 上对应的寄存器位置。
    pub fn locate(&self, key: &TagKey, address: &Address) -> Result<RegisterRef, ProtocolError> {
        match self.register_map(address) {
            Some(map) => map.locate(key),
            None => Err(ProtocolError::TagNotFound(format!(
                "{} (no register map for {})",
                key, address
            ))),
        }
    }

    /// 按 (区, 偏移) 直接写入。
    pub async fn send_register(
        &self,
        register: RegisterRef,
        value: TagValue,
        address: &Address,
    ) -> Result<(), ProtocolError> {
        let result = self.write_register(register, value, address).await;
        match &result {
            Ok(()) => record_send(),
            Err(e) => {
                record_send_failure();
                warn!(target: "cps.protocol", %address, %register, error = %e, "modbus write failed");
            }
        }
        result
    }

    /// 按 (区, 偏移) 直接读取。
    pub async fn receive_register(
        &self,
        register: RegisterRef,
        address: &Address,
    ) -> Result<TagValue, ProtocolError> {
        let result = self.read_register(register, address).await;
        match &result {
            Ok(_) => record_receive(),
            Err(e) => {
                record_receive_failure();
                warn!(target: "cps.protocol", %address, %register, error = %e, "modbus read failed");
            }
        }
        result
    }

    async fn write_register(
        &self,
        register: RegisterRef,
        value: TagValue,
        address: &Address,
    ) -> Result<(), ProtocolError> {
        if !register.bank.is_writable() {
            return Err(ProtocolError::ReadOnlyBank(format!(
                "{} is read-only",
                register
            )));
        }
        let value = encode_value(register.bank, value)?;
        debug!(target: "cps.protocol", %address, %register, %value, "modbus write");
        with_timeout(
            self.core.options().request_timeout(),
            address,
            self.client.write(address, register, value),
        )
        .await
    }

    async fn read_register(
        &self,
        register: RegisterRef,
        address: &Address,
    ) -> Result<TagValue, ProtocolError> {
        let value = with_timeout(
            self.core.options().request_timeout(),
            address,
            self.client.read(address, register),
        )
        .await?;
        debug!(target: "cps.protocol", %address, %register, %value, "modbus read");
        Ok(value)
    }
}

#[async_trait]
impl Protocol for ModbusProtocol {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn mode(&self) -> ProtocolMode {
        self.core.mode()
    }

    fn server_descriptor(&self) -> Option<&ServerDescriptor> {
        self.core.server_descriptor()
    }

    /// 命令中同时包含各区大小与逐标签的区归属。
    fn start_command(&self) -> Result<ServerCommand, ProtocolError> {
        let server = self.core.require_server()?;
        let map = self
            .registers
            .as_ref()
            .ok_or_else(|| ProtocolError::Config("missing register map".to_string()))?;
        let mut flags = Vec::new();
        for (bank, flag) in RegisterBank::ALL
            .iter()
            .zip(["--coil", "--di", "--hr", "--ir"])
        {
            flags.push(flag.to_string());
            flags.push(map.bank_size(*bank).to_string());
        }
        let program = self.core.server_program(Self::default_program());
        Ok(ServerCommand::build(
            &program,
            server.address(),
            &flags,
            server.tags(),
            TagStyle::Colon,
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
        let register = match self.locate(key, address) {
            Ok(register) => register,
            Err(e) => {
                record_send_failure();
                warn!(target: "cps.protocol", %address, %key, error = %e, "modbus write failed");
                return Err(e);
            }
        };
        self.send_register(register, value, address).await
    }

    async fn receive(&self, key: &TagKey, address: &Address) -> Result<TagValue, ProtocolError> {
        let register = match self.locate(key, address) {
            Ok(register) => register,
            Err(e) => {
                record_receive_failure();
                warn!(target: "cps.protocol", %address, %key, error = %e, "modbus read failed");
                return Err(e);
            }
        };
        self.receive_register(register, address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags() -> Vec<TagSpec> {
        vec![
            TagSpec::with_instance("CO1", 1, "CO"),
            TagSpec::with_instance("CO1", 2, "CO"),
            TagSpec::with_instance("DI1", 1, "DI"),
            TagSpec::with_instance("DI1", 2, "DI"),
            TagSpec::with_instance("HR1", 1, "HR"),
            TagSpec::with_instance("HR2", 2, "HR"),
            TagSpec::with_instance("IR1", 1, "IR"),
            TagSpec::with_instance("IR2", 4, "IR"),
        ]
    }

    #[test]
    fn test_offsets_follow_declaration_order() {
        let map = RegisterMap::build(&tags()).unwrap();
        assert_eq!(
            map.locate(&TagKey::with_instance("CO1", 2)).unwrap(),
            RegisterRef::new(RegisterBank::Coil, 1)
        );
        assert_eq!(
            map.locate(&TagKey::with_instance("HR1", 1)).unwrap(),
            RegisterRef::new(RegisterBank::HoldingRegister, 0)
        );
        assert_eq!(
            map.locate(&TagKey::with_instance("HR2", 2)).unwrap(),
            RegisterRef::new(RegisterBank::HoldingRegister, 1)
        );
        assert_eq!(
            map.locate(&TagKey::new("IR2")).unwrap(),
            RegisterRef::new(RegisterBank::InputRegister, 1)
        );
        for bank in RegisterBank::ALL {
            assert_eq!(map.bank_size(bank), 2);
        }
    }

    #[test]
    fn test_interleaved_banks() {
        let tags = vec![
            TagSpec::new("HR1", "HR"),
            TagSpec::new("CO1", "CO"),
            TagSpec::new("HR2", "HR"),
        ];
        let map = RegisterMap::build(&tags).unwrap();
        assert_eq!(map.locate(&TagKey::new("HR2")).unwrap().offset, 1);
        assert_eq!(map.locate(&TagKey::new("CO1")).unwrap().offset, 0);
        assert_eq!(map.bank_size(RegisterBank::DiscreteInput), 0);
    }

    #[test]
    fn test_reject_unknown_bank() {
        let tags = vec![TagSpec::new("X", "INT")];
        assert!(matches!(
            RegisterMap::build(&tags),
            Err(ProtocolError::Config(_))
        ));
    }

    #[test]
    fn test_encode_value() {
        assert_eq!(
            encode_value(RegisterBank::HoldingRegister, TagValue::Int(65535)).unwrap(),
            TagValue::Int(65535)
        );
        assert_eq!(
            encode_value(RegisterBank::Coil, TagValue::Bool(true)).unwrap(),
            TagValue::Bool(true)
        );
        assert!(encode_value(RegisterBank::HoldingRegister, TagValue::Int(-1)).is_err());
        assert!(encode_value(RegisterBank::HoldingRegister, TagValue::Int(70_000)).is_err());
        assert!(encode_value(RegisterBank::HoldingRegister, TagValue::Bool(true)).is_err());
        assert!(encode_value(RegisterBank::Coil, TagValue::Int(1)).is_err());
        assert!(encode_value(RegisterBank::Coil, TagValue::Real(1.0)).is_err());
    }
}
