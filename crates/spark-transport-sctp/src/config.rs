//! SCTP 传输配置。
//!
//! # 模块定位（Why）
//! - 接收缓冲大小、截断策略、地址与 backlog 上限等取值随部署环境变化，需要在不改代码的
//!   前提下调整；配置以 TOML 描述，由 `serde` 反序列化。
//!
//! # 暴露接口（What）
//! - [`SctpConfig`]：顶层配置，所有字段均有默认值。
//! - [`ReceiveConfig`] / [`TruncationPolicy`]：接收缓冲与"消息超出缓冲"时的处理方式。
//! - [`ConfigError`]：解析与校验失败。
//!
//! # 设计要点（How）
//! - `#[serde(default)]` 允许只写需要覆盖的字段；`validate` 在加载后统一校验取值范围。
//! - `default_subscriptions` 以事件名列表书写，加载时转换为
//!   [`EventMask`](crate::options::EventMask)。

use std::{fs, path::Path};

use serde::Deserialize;
use thiserror::Error;

use crate::{address::DEFAULT_MAX_ADDRESSES, notification::DEFAULT_DATA_CAP, options::EventMask};

/// 默认接收缓冲大小（字节）。
pub const DEFAULT_RECEIVE_BUFFER: usize = 1024;

/// usrsctp UDP 封装默认端口。
pub const DEFAULT_UDP_ENCAPSULATION_PORT: u16 = 9899;

/// 单次 bind/connect 地址个数的硬上限。
const MAX_ADDRESSES_LIMIT: usize = 64;

/// 配置加载或校验失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("无法读取配置文件 {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("配置解析失败: {message}")]
    Parse { message: String },
    #[error("配置项 {field} 取值非法: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// 消息超出接收缓冲时的处理方式。
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum TruncationPolicy {
    /// 交付已读到的前缀，并在 `DataMessage::complete` 上标记为 `false`。
    #[default]
    Report,
    /// 返回 `SctpError::MessageTooLarge`；剩余部分仍留在协议栈中。
    Error,
}

/// 接收相关配置。
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ReceiveConfig {
    pub buffer_size: usize,
    pub truncation: TruncationPolicy,
}

impl Default for ReceiveConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_RECEIVE_BUFFER,
            truncation: TruncationPolicy::Report,
        }
    }
}

/// usrsctp 运行时配置。
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct UsrsctpConfig {
    /// UDP 封装端口，`0` 表示不启用封装。
    pub udp_encapsulation_port: u16,
    /// 新套接字发往对端时使用的远端 UDP 封装端口，`0` 表示不设置。
    pub remote_udp_encapsulation_port: u16,
}

impl Default for UsrsctpConfig {
    fn default() -> Self {
        Self {
            udp_encapsulation_port: DEFAULT_UDP_ENCAPSULATION_PORT,
            remote_udp_encapsulation_port: 0,
        }
    }
}

/// 顶层配置。
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SctpConfig {
    pub receive: ReceiveConfig,
    pub max_addresses: usize,
    /// 覆盖能力描述中的 backlog 上限；为空时沿用能力描述。
    pub max_backlog: Option<i32>,
    pub notification_data_cap: usize,
    #[serde(rename = "default_subscriptions")]
    subscription_names: Vec<String>,
    pub usrsctp: UsrsctpConfig,
    #[serde(skip)]
    subscriptions: EventMask,
}

impl Default for SctpConfig {
    fn default() -> Self {
        Self {
            receive: ReceiveConfig::default(),
            max_addresses: DEFAULT_MAX_ADDRESSES,
            max_backlog: None,
            notification_data_cap: DEFAULT_DATA_CAP,
            subscription_names: Vec::new(),
            usrsctp: UsrsctpConfig::default(),
            subscriptions: EventMask::empty(),
        }
    }
}

impl SctpConfig {
    /// 从 TOML 文本加载并校验。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SctpConfig = toml::from_str(text).map_err(|err| ConfigError::Parse {
            message: err.to_string(),
        })?;
        config.validated()
    }

    /// 从文件加载并校验。
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 新建端点时自动应用的事件订阅。
    pub fn default_subscriptions(&self) -> EventMask {
        self.subscriptions
    }

    pub fn with_default_subscriptions(mut self, mask: EventMask) -> Self {
        self.subscription_names = mask.names().into_iter().map(str::to_owned).collect();
        self.subscriptions = mask;
        self
    }

    pub fn with_receive_buffer(mut self, buffer_size: usize) -> Self {
        self.receive.buffer_size = buffer_size;
        self
    }

    pub fn with_truncation(mut self, truncation: TruncationPolicy) -> Self {
        self.receive.truncation = truncation;
        self
    }

    pub fn with_max_backlog(mut self, max_backlog: i32) -> Self {
        self.max_backlog = Some(max_backlog);
        self
    }

    /// 校验取值范围并解析事件名。
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if self.receive.buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "receive.buffer_size",
                reason: "buffer size must be positive".to_owned(),
            });
        }
        if self.max_addresses == 0 || self.max_addresses > MAX_ADDRESSES_LIMIT {
            return Err(ConfigError::Invalid {
                field: "max_addresses",
                reason: format!("must be within 1..={MAX_ADDRESSES_LIMIT}"),
            });
        }
        if matches!(self.max_backlog, Some(backlog) if backlog < 0) {
            return Err(ConfigError::Invalid {
                field: "max_backlog",
                reason: "must not be negative".to_owned(),
            });
        }
        self.subscriptions = EventMask::from_names(&self.subscription_names).map_err(|err| {
            ConfigError::Invalid {
                field: "default_subscriptions",
                reason: err.to_string(),
            }
        })?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 空文档得到全部默认值。
    #[test]
    fn empty_document_uses_defaults() {
        let config = SctpConfig::from_toml_str("").expect("defaults");
        assert_eq!(config.receive.buffer_size, DEFAULT_RECEIVE_BUFFER);
        assert_eq!(config.receive.truncation, TruncationPolicy::Report);
        assert_eq!(config.max_addresses, 8);
        assert_eq!(config.notification_data_cap, 8192);
        assert_eq!(config.usrsctp.udp_encapsulation_port, 9899);
        assert!(config.default_subscriptions().is_empty());
    }

    #[test]
    fn overrides_and_subscriptions_are_parsed() {
        let config = SctpConfig::from_toml_str(
            r#"
            max_backlog = 32
            default_subscriptions = ["data_io", "association", "shutdown"]

            [receive]
            buffer_size = 65536
            truncation = "error"
            "#,
        )
        .expect("config");
        assert_eq!(config.receive.buffer_size, 65536);
        assert_eq!(config.receive.truncation, TruncationPolicy::Error);
        assert_eq!(config.max_backlog, Some(32));
        assert_eq!(
            config.default_subscriptions(),
            EventMask::DATA_IO | EventMask::ASSOCIATION | EventMask::SHUTDOWN
        );
    }

    /// 零缓冲在加载阶段即被拒绝。
    #[test]
    fn zero_buffer_is_invalid() {
        let err = SctpConfig::from_toml_str("[receive]\nbuffer_size = 0\n").expect_err("zero");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "receive.buffer_size",
                ..
            }
        ));
    }

    #[test]
    fn unknown_subscription_name_is_invalid() {
        let err = SctpConfig::from_toml_str("default_subscriptions = [\"nope\"]\n")
            .expect_err("unknown");
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "default_subscriptions",
                ..
            }
        ));
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(matches!(
            SctpConfig::from_toml_str("surprise = true\n"),
            Err(ConfigError::Parse { .. })
        ));
    }
}
