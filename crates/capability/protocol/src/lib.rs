//! # 测试床协议抽象
//!
//! 在两种工业协议之上提供统一的寻址与生命周期模型：
//! - **EtherNet/IP**：符号标签（CIP），由 `rust-ethernet-ip` 完成线上编解码
//! - **Modbus TCP**：四个寄存器区，由 `tokio-modbus` 完成线上编解码
//!
//! ## 架构设计
//!
//! ```text
//! ProtocolConfig (name + mode + server)
//!       │
//!       ▼
//! build_protocol ──► EnipProtocol / ModbusProtocol (impl Protocol)
//!       │                    │
//!       │                    ├── send/receive((name, instance), address)
//!       │                    │        │
//!       │                    │        ▼
//!       │                    │   TagClient / RegisterClient
//!       │                    │
//!       │                    └── start_server / stop_server
//!       │                             │
//!       ▼                             ▼
//! 调用方                        ServerProcess（外部模拟控制器进程）
//! ```
//!
//! ## 配置格式
//!
//! ```json
//! {
//!   "name": "modbus",
//!   "mode": 1,
//!   "server": {
//!     "address": "localhost:502",
//!     "tags": [["HR1", 1, "HR"], ["HR2", 2, "HR"], ["CO1", "CO"]]
//!   }
//! }
//! ```
//!
//! 读写均为单次请求/响应，带超时，不做重试。

mod enip;
mod error;
mod modbus;
mod protocol;
mod server;
mod types;

pub use domain::{
    Address, EnipType, ProtocolConfig, ProtocolMode, RegisterBank, ServerDescriptor, TagKey,
    TagSpec,
};
pub use enip::{EipTagClient, EnipProtocol, TagClient, check_value, wire_name};
pub use error::ProtocolError;
pub use modbus::{
    ModbusProtocol, RegisterClient, RegisterMap, RegisterRef, TcpRegisterClient, encode_value,
};
pub use protocol::{Protocol, ProtocolCore, build_protocol, load_config};
pub use server::{ServerCommand, ServerProcess, TagStyle};
pub use types::*;
