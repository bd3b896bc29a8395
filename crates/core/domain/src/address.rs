//! `host:port` 端点地址。

use crate::error::DomainError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 客户端与服务端共用的端点地址。
///
/// 构造后不可变，端口范围 1-65535。IPv6 主机以 `[::1]:502` 形式书写。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address {
    host: String,
    port: u16,
}

impl Address {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, DomainError> {
        let host = host.into();
        let host = host.trim();
        if host.is_empty() {
            return Err(DomainError::InvalidAddress("empty host".to_string()));
        }
        if port == 0 {
            return Err(DomainError::InvalidAddress(format!("{}:0", host)));
        }
        Ok(Self {
            host: host.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl FromStr for Address {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        let (host, port) = value
            .rsplit_once(':')
            .ok_or_else(|| DomainError::InvalidAddress(format!("missing port in {:?}", value)))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| DomainError::InvalidAddress(format!("bad port in {:?}", value)))?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        if host.contains(':') && !value.starts_with('[') {
            return Err(DomainError::InvalidAddress(format!(
                "ipv6 host must be bracketed: {:?}",
                value
            )));
        }
        Self::new(host, port)
    }
}

impl TryFrom<String> for Address {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Address> for String {
    fn from(address: Address) -> Self {
        address.to_string()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        let addr: Address = "localhost:44818".parse().unwrap();
        assert_eq!(addr.host(), "localhost");
        assert_eq!(addr.port(), 44818);
        assert_eq!(addr.to_string(), "localhost:44818");
    }

    #[test]
    fn test_parse_ipv6() {
        let addr: Address = "[::1]:502".parse().unwrap();
        assert_eq!(addr.host(), "::1");
        assert_eq!(addr.to_string(), "[::1]:502");
    }

    #[test]
    fn test_reject_invalid() {
        assert!("localhost".parse::<Address>().is_err());
        assert!("localhost:0".parse::<Address>().is_err());
        assert!("localhost:70000".parse::<Address>().is_err());
        assert!(":502".parse::<Address>().is_err());
        assert!("::1:502".parse::<Address>().is_err());
    }
}
