//! 测试用内存控制器与内存从站。

#![allow(dead_code)]

use async_trait::async_trait;
use cps_protocol::{
    Address, EnipType, ProtocolError, RegisterClient, RegisterRef, TagClient, TagValue,
};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// 内存中的 EtherNet/IP 控制器：按 (地址, 线上标签名) 保存值。
#[derive(Default)]
pub struct MemoryController {
    tags: Mutex<HashMap<(String, String), TagValue>>,
    writes: Mutex<Vec<(String, EnipType, TagValue)>>,
}

impl MemoryController {
    /// 预先声明标签（初值 0），模拟服务端启动时的标签表。
    pub fn with_tags(address: &Address, names: &[&str]) -> Self {
        let controller = Self::default();
        {
            let mut tags = controller.tags.lock().unwrap();
            for name in names {
                tags.insert((address.to_string(), name.to_string()), TagValue::Int(0));
            }
        }
        controller
    }

    pub fn writes(&self) -> Vec<(String, EnipType, TagValue)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl TagClient for MemoryController {
    async fn write_tag(
        &self,
        address: &Address,
        tag: &str,
        kind: EnipType,
        value: TagValue,
    ) -> Result<(), ProtocolError> {
        let mut tags = self.tags.lock().unwrap();
        let slot = tags
            .get_mut(&(address.to_string(), tag.to_string()))
            .ok_or_else(|| ProtocolError::Enip(format!("unknown tag {}", tag)))?;
        *slot = value;
        self.writes
            .lock()
            .unwrap()
            .push((tag.to_string(), kind, value));
        Ok(())
    }

    async fn read_tag(&self, address: &Address, tag: &str) -> Result<TagValue, ProtocolError> {
        self.tags
            .lock()
            .unwrap()
            .get(&(address.to_string(), tag.to_string()))
            .copied()
            .ok_or_else(|| ProtocolError::Enip(format!("unknown tag {}", tag)))
    }
}

/// 永不应答的控制器，用于验证超时。
pub struct StalledController;

#[async_trait]
impl TagClient for StalledController {
    async fn write_tag(
        &self,
        _address: &Address,
        _tag: &str,
        _kind: EnipType,
        _value: TagValue,
    ) -> Result<(), ProtocolError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(())
    }

    async fn read_tag(&self, _address: &Address, _tag: &str) -> Result<TagValue, ProtocolError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(TagValue::Int(0))
    }
}

/// 内存中的 Modbus 从站：未写入的寄存器读出 0 / false。
#[derive(Default)]
pub struct MemorySlave {
    registers: Mutex<HashMap<(String, RegisterRef), TagValue>>,
    writes: Mutex<Vec<(RegisterRef, TagValue)>>,
}

impl MemorySlave {
    pub fn writes(&self) -> Vec<(RegisterRef, TagValue)> {
        self.writes.lock().unwrap().clone()
    }

    /// 直接设置只读区的值（模拟现场输入）。
    pub fn preset(&self, address: &Address, register: RegisterRef, value: TagValue) {
        self.registers
            .lock()
            .unwrap()
            .insert((address.to_string(), register), value);
    }
}

#[async_trait]
impl RegisterClient for MemorySlave {
    async fn write(
        &self,
        address: &Address,
        register: RegisterRef,
        value: TagValue,
    ) -> Result<(), ProtocolError> {
        self.registers
            .lock()
            .unwrap()
            .insert((address.to_string(), register), value);
        self.writes.lock().unwrap().push((register, value));
        Ok(())
    }

    async fn read(&self, address: &Address, register: RegisterRef) -> Result<TagValue, ProtocolError> {
        let default = if register.bank.is_bit() {
            TagValue::Bool(false)
        } else {
            TagValue::Int(0)
        };
        Ok(self
            .registers
            .lock()
            .unwrap()
            .get(&(address.to_string(), register))
            .copied()
            .unwrap_or(default))
    }
}

/// 未被监听的本地端口（连接会被拒绝）。
pub fn closed_address() -> Address {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    Address::new("127.0.0.1", port).unwrap()
}
