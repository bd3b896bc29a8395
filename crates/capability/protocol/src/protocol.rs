//! 协议公共契约与共享状态
//!
//! 每个具体协议（EtherNet/IP、Modbus）都实现 [`Protocol`]，调用方只面对
//! (tag, instance) 键和目标地址，不需要知道底层是符号标签还是寄存器区。
//! 具体类型在构造时由配置中的 `name` 选定一次（见 [`build_protocol`]）。

use crate::enip::EnipProtocol;
use crate::error::ProtocolError;
use crate::modbus::ModbusProtocol;
use crate::server::{ServerCommand, ServerProcess};
use crate::types::{ProtocolOptions, ServerProgram, TagValue};
use async_trait::async_trait;
use domain::{Address, ProtocolConfig, ProtocolMode, ServerDescriptor, TagKey};
use std::path::Path;
use tracing::{debug, info};

/// 统一协议接口
///
/// 内嵌服务端采用显式启动策略：构造从不启动进程，调用方通过
/// [`Protocol::start_server`] 启动，[`Protocol::stop_server`] 或丢弃协议对象停止。
#[async_trait]
pub trait Protocol: Send + Sync {
    fn name(&self) -> &str;

    fn mode(&self) -> ProtocolMode;

    fn server_descriptor(&self) -> Option<&ServerDescriptor>;

    /// 内嵌服务端的启动命令；纯客户端模式下返回配置错误。
    fn start_command(&self) -> Result<ServerCommand, ProtocolError>;

    /// 启动内嵌服务端；已在运行时不做任何事。
    fn start_server(&mut self) -> Result<(), ProtocolError>;

    /// 停止内嵌服务端；可重复调用，从不失败。
    async fn stop_server(&mut self);

    fn is_server_running(&mut self) -> bool;

    /// 向 `address` 上的标签写入一个值（一次请求/响应）。
    async fn send(&self, key: &TagKey, value: TagValue, address: &Address)
        -> Result<(), ProtocolError>;

    /// 从 `address` 上的标签读取一个值（一次请求/响应）。
    async fn receive(&self, key: &TagKey, address: &Address) -> Result<TagValue, ProtocolError>;
}

/// 读取并校验 JSON 协议配置文件。
pub fn load_config(path: impl AsRef<Path>) -> Result<ProtocolConfig, ProtocolError> {
    let raw = std::fs::read_to_string(path)?;
    Ok(ProtocolConfig::from_json(&raw)?)
}

/// 按配置名称构造具体协议。
pub fn build_protocol(
    config: ProtocolConfig,
    options: ProtocolOptions,
) -> Result<Box<dyn Protocol>, ProtocolError> {
    match config.name() {
        name if EnipProtocol::NAMES.contains(&name) => {
            Ok(Box::new(EnipProtocol::with_options(config, options)?))
        }
        name if ModbusProtocol::NAMES.contains(&name) => {
            Ok(Box::new(ModbusProtocol::with_options(config, options)?))
        }
        other => Err(ProtocolError::Config(format!("unsupported protocol {:?}", other))),
    }
}

/// 具体协议共享的配置与服务端进程状态。
#[derive(Debug)]
pub struct ProtocolCore {
    config: ProtocolConfig,
    options: ProtocolOptions,
    server: Option<ServerProcess>,
}

impl ProtocolCore {
    /// 校验配置名称属于 `names` 之一。
    pub fn new(
        config: ProtocolConfig,
        options: ProtocolOptions,
        names: &[&str],
    ) -> Result<Self, ProtocolError> {
        if !names.contains(&config.name()) {
            return Err(ProtocolError::Config(format!(
                "protocol name {:?} does not match {:?}",
                config.name(),
                names
            )));
        }
        if options.request_timeout_ms == 0 {
            return Err(ProtocolError::Config(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            config,
            options,
            server: None,
        })
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn options(&self) -> &ProtocolOptions {
        &self.options
    }

    pub fn name(&self) -> &str {
        self.config.name()
    }

    pub fn mode(&self) -> ProtocolMode {
        self.config.mode()
    }

    pub fn server_descriptor(&self) -> Option<&ServerDescriptor> {
        self.config.server()
    }

    /// `address` 指向自己的内嵌服务端时返回其描述。
    pub fn own_server(&self, address: &Address) -> Option<&ServerDescriptor> {
        self.config
            .server()
            .filter(|server| server.address() == address)
    }

    /// 纯客户端模式下没有服务端描述。
    pub fn require_server(&self) -> Result<&ServerDescriptor, ProtocolError> {
        self.config.server().ok_or_else(|| {
            ProtocolError::Config(format!(
                "{} is configured in client mode, no embedded server",
                self.name()
            ))
        })
    }

    /// 选项中的程序覆盖优先，否则使用协议默认值。
    pub fn server_program(&self, default: ServerProgram) -> ServerProgram {
        self.options.server_program.clone().unwrap_or(default)
    }

    pub fn start_server(&mut self, command: ServerCommand) -> Result<(), ProtocolError> {
        self.require_server()?;
        if let Some(server) = self.server.as_mut() {
            if server.is_running() {
                debug!(
                    target: "cps.protocol",
                    protocol = %self.config.name(),
                    pid = ?server.id(),
                    "embedded server already running"
                );
                return Ok(());
            }
        }

        let process = ServerProcess::start(&command, self.options.stop_grace())?;
        info!(
            target: "cps.protocol",
            protocol = %self.config.name(),
            pid = ?process.id(),
            "embedded server started"
        );
        self.server = Some(process);
        Ok(())
    }

    pub async fn stop_server(&mut self) {
        match self.server.take() {
            Some(mut server) => server.stop().await,
            None => debug!(
                target: "cps.protocol",
                protocol = %self.config.name(),
                "no embedded server to stop"
            ),
        }
    }

    pub fn is_server_running(&mut self) -> bool {
        self.server
            .as_mut()
            .map(ServerProcess::is_running)
            .unwrap_or(false)
    }
}
