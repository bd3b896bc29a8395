//! 服务端描述与标签解析。

use crate::address::Address;
use crate::error::DomainError;
use crate::tag::{TagKey, TagSpec};
use std::collections::HashSet;

/// 内嵌服务端描述：监听地址 + 有序标签表。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    address: Address,
    tags: Vec<TagSpec>,
}

impl ServerDescriptor {
    /// 构造并校验描述（标签表非空、复合键唯一）。
    pub fn new(address: Address, tags: Vec<TagSpec>) -> Result<Self, DomainError> {
        if tags.is_empty() {
            return Err(DomainError::Config(format!(
                "server {} declares no tags",
                address
            )));
        }
        validate_tags(&tags)?;
        Ok(Self { address, tags })
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn tags(&self) -> &[TagSpec] {
        &self.tags
    }

    /// 按复合键解析标签，规则见 [`resolve_tag`]。
    pub fn resolve(&self, key: &TagKey) -> Result<&TagSpec, DomainError> {
        resolve_tag(&self.tags, key)
    }
}

/// 校验标签表：(name, instance) 唯一；无实例号的标签按名称唯一。
pub fn validate_tags(tags: &[TagSpec]) -> Result<(), DomainError> {
    let mut keys = HashSet::new();
    for tag in tags {
        if !keys.insert(tag.key()) {
            return Err(DomainError::Config(format!("duplicate tag {}", tag.key())));
        }
    }

    for tag in tags.iter().filter(|tag| tag.instance().is_none()) {
        let same_name = tags.iter().filter(|other| other.name() == tag.name()).count();
        if same_name > 1 {
            return Err(DomainError::Config(format!(
                "tag {} has no instance but its name is shared by {} tags",
                tag.name(),
                same_name
            )));
        }
    }
    Ok(())
}

/// 解析查找键。
///
/// 1. 先按 (name, instance) 精确匹配；
/// 2. 键未带实例号时，取该名称下唯一的标签；同名标签多于一个时返回
///    `AmbiguousTag`，此时调用方必须给出实例号。
///
/// 纯函数，不触碰网络。
pub fn resolve_tag<'a>(tags: &'a [TagSpec], key: &TagKey) -> Result<&'a TagSpec, DomainError> {
    if let Some(tag) = tags.iter().find(|tag| tag.matches(key)) {
        return Ok(tag);
    }
    if key.instance().is_some() {
        return Err(DomainError::TagNotFound(key.to_string()));
    }

    let mut candidates = tags.iter().filter(|tag| tag.name() == key.name());
    match (candidates.next(), candidates.count()) {
        (None, _) => Err(DomainError::TagNotFound(key.to_string())),
        (Some(tag), 0) => Ok(tag),
        (Some(_), rest) => Err(DomainError::AmbiguousTag(key.name().to_string(), rest + 1)),
    }
}
