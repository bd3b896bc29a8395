//! 测试床领域模型：端点地址、标签描述、服务端描述与协议配置。
//!
//! 本 crate 不做任何网络或进程操作，只负责：
//! - 解析/校验 `host:port` 地址
//! - 描述标签（名称 + 可选实例号 + 类型）
//! - 按 (name, instance) 复合键解析标签（multikey）
//! - 校验协议配置中 mode 与 server 的一致性

pub mod address;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod tag;

pub use address::Address;
pub use config::{ProtocolConfig, ProtocolMode};
pub use descriptor::{ServerDescriptor, resolve_tag, validate_tags};
pub use error::DomainError;
pub use tag::{EnipType, RegisterBank, TagKey, TagSpec};
