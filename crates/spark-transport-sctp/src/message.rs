//! 消息模型与规范化请求。
//!
//! # 模块定位（Why）
//! - 外部绑定层负责把宿主语言参数整理成本模块的请求记录；核心只消费这些强类型记录，
//!   不关心参数来自何处。
//! - 发送 / 接收的辅助信息在内核与 usrsctp 中分别以 `sctp_sndrcvinfo` 与
//!   `sctp_sndinfo`/`sctp_rcvinfo` 承载；这里给出与后端无关的逻辑视图。
//!
//! # 暴露接口（What）
//! - [`SendFlags`] / [`SendParams`]：发送参数。
//! - [`ReceivedMessage`]：一次接收的结果，应用数据或通知二选一。
//! - [`BindRequest`] / [`ConnectRequest`] / [`SendRequest`] / [`ReceiveRequest`]。

use std::net::{IpAddr, SocketAddr};

use bitflags::bitflags;
use bytes::Bytes;

use crate::{
    address::{BindMode, SctpAddress, parse_ip},
    error::{Result, SctpError},
    notification::Notification,
};

bitflags! {
    /// 逻辑发送标志，由后端翻译为各自的原生取值。
    ///
    /// `PR_TTL` / `PR_RTX` / `PR_PRIO` 是互斥的部分可靠策略位。
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct SendFlags: u32 {
        const UNORDERED = 1 << 0;
        const ADDR_OVER = 1 << 1;
        const ABORT = 1 << 2;
        const EOF = 1 << 3;
        const SENDALL = 1 << 4;
        const SACK_IMMEDIATELY = 1 << 5;
        const PR_TTL = 1 << 8;
        const PR_RTX = 1 << 9;
        const PR_PRIO = 1 << 10;
    }
}

impl SendFlags {
    pub const PR_POLICY_MASK: SendFlags = SendFlags::PR_TTL
        .union(SendFlags::PR_RTX)
        .union(SendFlags::PR_PRIO);

    /// 由外部层传入的原始位构造；包含未知位时返回参数错误。
    pub fn from_raw(bits: u32) -> Result<Self> {
        let flags = SendFlags::from_bits(bits)
            .ok_or_else(|| SctpError::argument(format!("unknown send flags: {bits:#x}")))?;
        flags.validate()?;
        Ok(flags)
    }

    pub(crate) fn validate(self) -> Result<()> {
        if self.intersection(Self::PR_POLICY_MASK).bits().count_ones() > 1 {
            return Err(SctpError::argument(
                "only one partial reliability policy may be selected",
            ));
        }
        Ok(())
    }

    /// 计算实际生效的部分可靠策略：`ttl > 0` 且未显式选择策略时按 TTL 处理。
    pub(crate) fn effective_policy(self, ttl_ms: u32) -> PrPolicy {
        if self.contains(SendFlags::PR_RTX) {
            PrPolicy::Retransmissions
        } else if self.contains(SendFlags::PR_PRIO) {
            PrPolicy::Priority
        } else if self.contains(SendFlags::PR_TTL) || ttl_ms > 0 {
            PrPolicy::Ttl
        } else {
            PrPolicy::Reliable
        }
    }
}

/// 部分可靠（PR-SCTP）策略。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PrPolicy {
    Reliable,
    Ttl,
    Retransmissions,
    Priority,
}

/// 单次发送的参数。
///
/// `association_id == 0` 表示使用端点的默认关联；`ttl_ms == 0` 表示完全可靠。
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SendParams {
    pub stream: u16,
    pub ppid: u32,
    pub flags: SendFlags,
    pub ttl_ms: u32,
    pub context: u32,
    pub association_id: i32,
    pub destinations: Vec<SocketAddr>,
}

impl SendParams {
    pub fn with_stream(mut self, stream: u16) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_ppid(mut self, ppid: u32) -> Self {
        self.ppid = ppid;
        self
    }

    pub fn with_flags(mut self, flags: SendFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_ttl(mut self, ttl_ms: u32) -> Self {
        self.ttl_ms = ttl_ms;
        self
    }

    pub fn with_context(mut self, context: u32) -> Self {
        self.context = context;
        self
    }

    pub fn with_association(mut self, association_id: i32) -> Self {
        self.association_id = association_id;
        self
    }

    pub fn with_destinations(mut self, destinations: Vec<SocketAddr>) -> Self {
        self.destinations = destinations;
        self
    }
}

bitflags! {
    /// 接收侧辅助信息中的标志位。
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct RecvInfoFlags: u16 {
        const UNORDERED = 1 << 0;
    }
}

/// 接收到的应用数据及其辅助信息。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DataMessage {
    pub payload: Bytes,
    pub stream: u16,
    pub ssn: u16,
    pub flags: RecvInfoFlags,
    pub ppid: u32,
    pub context: u32,
    pub ttl: u32,
    pub tsn: u32,
    pub cumtsn: u32,
    pub association_id: i32,
    pub sender: Option<SctpAddress>,
    /// `false` 表示消息超出接收缓冲，仅交付了前缀（剩余部分留在协议栈中）。
    pub complete: bool,
}

/// 一次接收的结果。
///
/// 分支依据接收调用返回的通知标志，与载荷内容无关。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReceivedMessage {
    Data(DataMessage),
    Event(Notification),
}

impl ReceivedMessage {
    pub fn is_notification(&self) -> bool {
        matches!(self, ReceivedMessage::Event(_))
    }

    pub fn as_data(&self) -> Option<&DataMessage> {
        match self {
            ReceivedMessage::Data(data) => Some(data),
            ReceivedMessage::Event(_) => None,
        }
    }

    pub fn into_data(self) -> Option<DataMessage> {
        match self {
            ReceivedMessage::Data(data) => Some(data),
            ReceivedMessage::Event(_) => None,
        }
    }

    pub fn as_notification(&self) -> Option<&Notification> {
        match self {
            ReceivedMessage::Event(event) => Some(event),
            ReceivedMessage::Data(_) => None,
        }
    }

    /// 关联标识：应用数据取辅助信息中的值，通知取事件记录中的值。
    pub fn association_id(&self) -> i32 {
        match self {
            ReceivedMessage::Data(data) => data.association_id,
            ReceivedMessage::Event(event) => event.association_id(),
        }
    }
}

/// 规范化的 bind 请求。
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BindRequest {
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    pub mode: BindMode,
}

impl BindRequest {
    pub fn new(addresses: Vec<IpAddr>, port: u16) -> Self {
        Self {
            addresses,
            port,
            mode: BindMode::Add,
        }
    }

    /// 通配地址上的 bind；`port == 0` 表示由协议栈分配。
    pub fn any(port: u16) -> Self {
        Self::new(Vec::new(), port)
    }

    pub fn from_text<S: AsRef<str>>(addresses: &[S], port: u16) -> Result<Self> {
        Ok(Self::new(parse_all(addresses)?, port))
    }

    pub fn with_mode(mut self, mode: BindMode) -> Self {
        self.mode = mode;
        self
    }
}

/// 规范化的 connect 请求；地址列表与端口都不能为空。
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ConnectRequest {
    pub addresses: Vec<IpAddr>,
    pub port: u16,
}

impl ConnectRequest {
    pub fn new(addresses: Vec<IpAddr>, port: u16) -> Self {
        Self { addresses, port }
    }

    pub fn from_text<S: AsRef<str>>(addresses: &[S], port: u16) -> Result<Self> {
        Ok(Self::new(parse_all(addresses)?, port))
    }
}

/// 规范化的发送请求，`fragments` 按顺序拼接为一条 SCTP 消息。
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SendRequest {
    pub fragments: Vec<Bytes>,
    pub params: SendParams,
}

impl SendRequest {
    pub fn new(payload: impl Into<Bytes>, params: SendParams) -> Self {
        Self {
            fragments: vec![payload.into()],
            params,
        }
    }

    pub fn vectored(fragments: Vec<Bytes>, params: SendParams) -> Self {
        Self { fragments, params }
    }

    pub fn total_len(&self) -> usize {
        self.fragments.iter().map(Bytes::len).sum()
    }
}

bitflags! {
    /// 接收调用的附加标志。
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct ReceiveFlags: u32 {
        const PEEK = 1 << 0;
        const DONT_WAIT = 1 << 1;
    }
}

/// 规范化的接收请求；`buffer_size` 为空时使用配置中的默认值。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReceiveRequest {
    pub buffer_size: Option<usize>,
    pub flags: ReceiveFlags,
}

impl ReceiveRequest {
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = Some(size);
        self
    }

    pub fn with_flags(mut self, flags: ReceiveFlags) -> Self {
        self.flags = flags;
        self
    }
}

fn parse_all<S: AsRef<str>>(addresses: &[S]) -> Result<Vec<IpAddr>> {
    addresses.iter().map(|text| parse_ip(text.as_ref())).collect()
}
