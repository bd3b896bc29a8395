//! 标签描述与复合查找键。
//!
//! 同一个服务端描述中可能出现多个同名标签（例如两个控制器实例都暴露
//! `SENSOR1`），它们用实例号区分。查找键因此始终是 (name, instance) 二元组，
//! 不拼接成单个字符串。

use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 标签查找键：名称 + 可选实例号。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TagKey {
    name: String,
    instance: Option<u32>,
}

impl TagKey {
    /// 仅按名称寻址的键。
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance: None,
        }
    }

    /// 按 (名称, 实例号) 寻址的键。
    pub fn with_instance(name: impl Into<String>, instance: u32) -> Self {
        Self {
            name: name.into(),
            instance: Some(instance),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> Option<u32> {
        self.instance
    }
}

impl From<&str> for TagKey {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<(&str, u32)> for TagKey {
    fn from((name, instance): (&str, u32)) -> Self {
        Self::with_instance(name, instance)
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.instance {
            Some(instance) => write!(f, "({}, {})", self.name, instance),
            None => write!(f, "({})", self.name),
        }
    }
}

/// 单个可寻址信号。
///
/// `kind` 保持协议无关的原始文本（如 `INT`、`HR`），由具体协议在构造时
/// 解析为 [`EnipType`] 或 [`RegisterBank`]。
///
/// 配置中以元组书写：`["SENSOR1", 1, "INT"]` 或 `["ACTUATOR1", "INT"]`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTag", into = "RawTag")]
pub struct TagSpec {
    name: String,
    instance: Option<u32>,
    kind: String,
}

impl TagSpec {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance: None,
            kind: kind.into(),
        }
    }

    pub fn with_instance(name: impl Into<String>, instance: u32, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance: Some(instance),
            kind: kind.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instance(&self) -> Option<u32> {
        self.instance
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn key(&self) -> TagKey {
        TagKey {
            name: self.name.clone(),
            instance: self.instance,
        }
    }

    /// 精确匹配 (name, instance)。
    pub fn matches(&self, key: &TagKey) -> bool {
        self.name == key.name && self.instance == key.instance
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawTag {
    Multi(String, u32, String),
    Single(String, String),
}

impl TryFrom<RawTag> for TagSpec {
    type Error = DomainError;

    fn try_from(raw: RawTag) -> Result<Self, Self::Error> {
        let spec = match raw {
            RawTag::Multi(name, instance, kind) => Self::with_instance(name, instance, kind),
            RawTag::Single(name, kind) => Self::new(name, kind),
        };
        if spec.name.trim().is_empty() {
            return Err(DomainError::Config("tag name must not be empty".to_string()));
        }
        if spec.kind.trim().is_empty() {
            return Err(DomainError::InvalidKind(format!("empty kind for {}", spec.name)));
        }
        Ok(spec)
    }
}

impl From<TagSpec> for RawTag {
    fn from(spec: TagSpec) -> Self {
        match spec.instance {
            Some(instance) => RawTag::Multi(spec.name, instance, spec.kind),
            None => RawTag::Single(spec.name, spec.kind),
        }
    }
}

/// EtherNet/IP 标签的 CIP 基本类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnipType {
    Bool,
    Sint,
    Int,
    Dint,
    Real,
}

impl EnipType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bool => "BOOL",
            Self::Sint => "SINT",
            Self::Int => "INT",
            Self::Dint => "DINT",
            Self::Real => "REAL",
        }
    }

    /// 整数类型的取值范围，非整数类型返回 None。
    pub fn int_range(&self) -> Option<(i64, i64)> {
        match self {
            Self::Sint => Some((i8::MIN as i64, i8::MAX as i64)),
            Self::Int => Some((i16::MIN as i64, i16::MAX as i64)),
            Self::Dint => Some((i32::MIN as i64, i32::MAX as i64)),
            Self::Bool | Self::Real => None,
        }
    }
}

impl FromStr for EnipType {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "BOOL" => Ok(Self::Bool),
            "SINT" => Ok(Self::Sint),
            "INT" => Ok(Self::Int),
            "DINT" => Ok(Self::Dint),
            "REAL" => Ok(Self::Real),
            _ => Err(DomainError::InvalidKind(format!("unknown enip type {:?}", value))),
        }
    }
}

impl fmt::Display for EnipType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Modbus 的四个互不相交的地址空间。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RegisterBank {
    /// 线圈（可读写位）
    Coil,
    /// 离散输入（只读位）
    DiscreteInput,
    /// 保持寄存器（可读写 16 位）
    HoldingRegister,
    /// 输入寄存器（只读 16 位）
    InputRegister,
}

impl RegisterBank {
    pub const ALL: [RegisterBank; 4] = [
        Self::Coil,
        Self::DiscreteInput,
        Self::HoldingRegister,
        Self::InputRegister,
    ];

    /// 配置与命令行中使用的两字母代码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Coil => "CO",
            Self::DiscreteInput => "DI",
            Self::HoldingRegister => "HR",
            Self::InputRegister => "IR",
        }
    }

    /// 只有线圈和保持寄存器可写。
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Coil | Self::HoldingRegister)
    }

    /// 位类型（线圈、离散输入）还是 16 位字类型。
    pub fn is_bit(&self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }
}

impl FromStr for RegisterBank {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "co" | "coil" => Ok(Self::Coil),
            "di" | "discrete-input" => Ok(Self::DiscreteInput),
            "hr" | "holding-register" => Ok(Self::HoldingRegister),
            "ir" | "input-register" => Ok(Self::InputRegister),
            _ => Err(DomainError::InvalidKind(format!(
                "unknown register bank {:?}",
                value
            ))),
        }
    }
}

impl fmt::Display for RegisterBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}
