//! 能力描述与集中式选项映射表。
//!
//! # 模块定位（Why）
//! - 同一逻辑选项在两个后端、甚至同一后端的不同版本中名字不同（例如事件订阅中的
//!   "发送失败"字段在新内核中被重命名为 `sctp_send_failure_event_event`）。散落在各处的
//!   条件编译会让调用方代码分叉，因此所有"逻辑名 → 原生名"的翻译集中在 [`OptionTable`]。
//! - 平台特性探测不在本 crate 内完成；外部构建层把探测结果整理为 [`Capabilities`]
//!   交给本模块（可直接从 TOML 反序列化）。
//!
//! # 暴露接口（What）
//! - [`Capabilities`]：外部探测结果。
//! - [`NativeOption`]：原生 `(level, name)`。
//! - [`OptionTable`]：按逻辑名查询原生名，并给出事件订阅布局。
//!
//! # 设计要点（How）
//! - 表在 [`SctpStack`](crate::SctpStack) 构建时生成一次，此后只读并在端点间共享。
//! - 缺失的条目表示"当前后端不支持"，查询时返回 `SctpError::Unsupported`。

use std::collections::HashMap;

use serde::Deserialize;

use crate::{
    error::{Result, SctpError},
    options::SctpOption,
};

/// 外部探测层提供的能力描述。
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Capabilities {
    /// 是否使用新的"发送失败事件"命名（`SCTP_SEND_FAILED_EVENT` /
    /// `sctp_send_failure_event_event`）；否则使用旧的 `SCTP_SEND_FAILED`。
    pub send_failure_event_event: bool,
    pub sender_dry_event: bool,
    pub stream_reset_event: bool,
    /// 是否提供 `SCTP_AUTH_SUPPORTED` 选项。
    pub auth_supported_option: bool,
    /// `listen` 允许的最大 backlog。
    pub max_backlog: i32,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            send_failure_event_event: false,
            sender_dry_event: true,
            stream_reset_event: true,
            auth_supported_option: true,
            max_backlog: nix::libc::SOMAXCONN,
        }
    }
}

impl Capabilities {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| {
            SctpError::Config(crate::config::ConfigError::Parse {
                message: err.to_string(),
            })
        })
    }
}

/// 原生选项坐标。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct NativeOption {
    pub level: i32,
    pub name: i32,
}

impl NativeOption {
    pub const fn new(level: i32, name: i32) -> Self {
        Self { level, name }
    }
}

/// "发送失败"事件在当前平台上的命名。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SendFailureNaming {
    /// `SCTP_SEND_FAILED` / `sctp_send_failure_event`。
    Legacy,
    /// `SCTP_SEND_FAILED_EVENT` / `sctp_send_failure_event_event`。
    Event,
}

/// 事件订阅的原生布局描述。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SubscriptionLayout {
    pub send_failure: SendFailureNaming,
    pub sender_dry: bool,
    pub stream_reset: bool,
}

impl SubscriptionLayout {
    /// 内核 `sctp_event_subscribe` 按能力截取的有效字节数。
    ///
    /// 字段顺序：data_io、association、address、send_failure、peer_error、shutdown、
    /// partial_delivery、adaptation_layer、authentication、sender_dry、stream_reset、
    /// assoc_reset、stream_change、send_failure_event。
    pub fn struct_len(&self) -> usize {
        match (self.send_failure, self.stream_reset, self.sender_dry) {
            (SendFailureNaming::Event, _, _) => 14,
            (SendFailureNaming::Legacy, true, _) => 11,
            (SendFailureNaming::Legacy, false, true) => 10,
            (SendFailureNaming::Legacy, false, false) => 9,
        }
    }
}

/// 逻辑选项到原生选项的集中映射。
#[derive(Clone, Debug)]
pub struct OptionTable {
    backend: &'static str,
    entries: HashMap<SctpOption, NativeOption>,
    subscription: SubscriptionLayout,
    max_backlog: i32,
}

impl OptionTable {
    /// 依据后端原生名列表与能力描述生成映射表。
    pub fn build(
        backend: &'static str,
        natives: &[(SctpOption, NativeOption)],
        capabilities: &Capabilities,
    ) -> Self {
        let entries = natives
            .iter()
            .filter(|(option, _)| match option {
                SctpOption::AuthSupported => capabilities.auth_supported_option,
                _ => true,
            })
            .copied()
            .collect();
        let send_failure = if capabilities.send_failure_event_event {
            SendFailureNaming::Event
        } else {
            SendFailureNaming::Legacy
        };
        Self {
            backend,
            entries,
            subscription: SubscriptionLayout {
                send_failure,
                sender_dry: capabilities.sender_dry_event,
                stream_reset: capabilities.stream_reset_event,
            },
            max_backlog: capabilities.max_backlog,
        }
    }

    pub fn backend(&self) -> &'static str {
        self.backend
    }

    /// 查询原生坐标；缺失时返回 `Unsupported`。
    pub fn resolve(&self, option: SctpOption) -> Result<NativeOption> {
        self.entries
            .get(&option)
            .copied()
            .ok_or(SctpError::Unsupported {
                option,
                backend: self.backend,
            })
    }

    pub fn supports(&self, option: SctpOption) -> bool {
        self.entries.contains_key(&option)
    }

    pub fn subscription(&self) -> SubscriptionLayout {
        self.subscription
    }

    pub fn max_backlog(&self) -> i32 {
        self.max_backlog
    }

    pub(crate) fn with_max_backlog(mut self, max_backlog: i32) -> Self {
        self.max_backlog = max_backlog;
        self
    }
}
