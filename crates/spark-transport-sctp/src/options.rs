//! 套接字选项的逻辑命名与强类型取值。
//!
//! 逻辑名 [`SctpOption`] 与原生 `(level, name)` 的对应关系只存在于
//! [`OptionTable`](crate::capability::OptionTable) 中；原生结构体布局由各后端负责编解码。

use std::{fmt, net::SocketAddr, time::Duration};

use bitflags::bitflags;

use crate::{
    address::SctpAddress,
    error::{Result, SctpError},
    message::SendFlags,
};

/// 逻辑选项名。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SctpOption {
    RtoInfo,
    AssociationInfo,
    InitMsg,
    NoDelay,
    AutoClose,
    DisableFragments,
    PeerAddressParams,
    DefaultSendParams,
    Events,
    MappedV4,
    MaxSegment,
    Status,
    AuthKey,
    AuthActiveKey,
    AuthDeleteKey,
    AuthDeactivateKey,
    AuthSupported,
    ReceiveRcvInfo,
    ReceiveTimeout,
    SendTimeout,
    Linger,
}

/// 读取选项时附带的定位信息。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct OptionQuery {
    pub association_id: i32,
    pub address: Option<SocketAddr>,
}

impl OptionQuery {
    pub fn association(association_id: i32) -> Self {
        Self {
            association_id,
            address: None,
        }
    }
}

/// 强类型选项值。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum OptionValue {
    Rto(RtoInfo),
    Association(AssocParams),
    Init(InitParams),
    Flag(bool),
    /// 以秒为单位的数值（autoclose）。
    Seconds(u32),
    /// 通用 32 位数值（最大分片等）。
    Value(u32),
    PeerAddress(PeerAddressParams),
    SendInfo(SendInfo),
    Events(EventMask),
    Status(Status),
    AuthKey(AuthKey),
    KeyId(AuthKeyId),
    Timeout(Option<Duration>),
    Linger(Option<Duration>),
}

impl OptionValue {
    /// 构造"取值形态与选项不符"的参数错误。
    pub(crate) fn mismatch(option: SctpOption, value: &OptionValue) -> SctpError {
        SctpError::argument(format!("value {value:?} does not fit option {option:?}"))
    }
}

/// 关联的宏观状态，仅作信息展示，不驱动任何状态转换。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AssociationState {
    Empty,
    Closed,
    Bound,
    Listen,
    CookieWait,
    CookieEchoed,
    Established,
    ShutdownPending,
    ShutdownSent,
    ShutdownReceived,
    ShutdownAckSent,
    Unknown(i32),
}

impl fmt::Display for AssociationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AssociationState::Empty => "empty",
            AssociationState::Closed => "closed",
            AssociationState::Bound => "bound",
            AssociationState::Listen => "listen",
            AssociationState::CookieWait => "cookie wait",
            AssociationState::CookieEchoed => "cookie echoed",
            AssociationState::Established => "established",
            AssociationState::ShutdownPending => "shutdown pending",
            AssociationState::ShutdownSent => "shutdown sent",
            AssociationState::ShutdownReceived => "shutdown received",
            AssociationState::ShutdownAckSent => "shutdown ack sent",
            AssociationState::Unknown(_) => "unknown",
        };
        f.write_str(label)
    }
}

/// 传输路径状态。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PathState {
    Active,
    Inactive,
    Unconfirmed,
    PotentiallyFailed,
    Unknown(i32),
}

/// 单条对端路径的信息（`SCTP_STATUS` 中的主路径）。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerAddressInfo {
    pub association_id: i32,
    pub address: Option<SctpAddress>,
    pub state: PathState,
    pub cwnd: u32,
    pub srtt: u32,
    pub rto: u32,
    pub mtu: u32,
}

/// `SCTP_STATUS` 的逻辑视图。
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Status {
    pub association_id: i32,
    pub state: AssociationState,
    pub receive_window: u32,
    pub unacked_data: u16,
    pub pending_data: u16,
    pub inbound_streams: u16,
    pub outbound_streams: u16,
    pub fragmentation_point: u32,
    pub primary: PeerAddressInfo,
}

/// 重传超时参数（毫秒）。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RtoInfo {
    pub association_id: i32,
    pub initial: u32,
    pub max: u32,
    pub min: u32,
}

/// 关联级参数。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AssocParams {
    pub association_id: i32,
    pub max_retransmissions: u16,
    pub peer_destinations: u16,
    pub peer_receive_window: u32,
    pub local_receive_window: u32,
    pub cookie_life: u32,
}

/// INIT 块参数，`0` 表示沿用协议栈默认值。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct InitParams {
    pub num_ostreams: u16,
    pub max_instreams: u16,
    pub max_attempts: u16,
    pub max_init_timeout: u16,
}

bitflags! {
    /// 对端地址参数标志（心跳、PMTU 探测、SACK 延迟的开关）。
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct PeerAddressFlags: u32 {
        const HB_ENABLE = 1 << 0;
        const HB_DISABLE = 1 << 1;
        const HB_DEMAND = 1 << 2;
        const PMTUD_ENABLE = 1 << 3;
        const PMTUD_DISABLE = 1 << 4;
        const SACKDELAY_ENABLE = 1 << 5;
        const SACKDELAY_DISABLE = 1 << 6;
        const HB_TIME_IS_ZERO = 1 << 7;
    }
}

/// 单条对端地址（或整条关联）的路径参数。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct PeerAddressParams {
    pub association_id: i32,
    pub address: Option<SocketAddr>,
    pub heartbeat_interval: u32,
    pub path_max_retransmissions: u16,
    pub path_mtu: u32,
    pub sack_delay: u32,
    pub flags: PeerAddressFlags,
}

/// 默认发送参数。
///
/// usrsctp 的 `SCTP_DEFAULT_SNDINFO` 不携带 `ttl_ms`，写入时忽略、读取时为 0。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct SendInfo {
    pub stream: u16,
    pub flags: SendFlags,
    pub ppid: u32,
    pub context: u32,
    pub ttl_ms: u32,
    pub association_id: i32,
}

bitflags! {
    /// 事件订阅集合。
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct EventMask: u32 {
        const DATA_IO = 1 << 0;
        const ASSOCIATION = 1 << 1;
        const ADDRESS = 1 << 2;
        const SEND_FAILURE = 1 << 3;
        const PEER_ERROR = 1 << 4;
        const SHUTDOWN = 1 << 5;
        const PARTIAL_DELIVERY = 1 << 6;
        const ADAPTATION_LAYER = 1 << 7;
        const AUTHENTICATION = 1 << 8;
        const SENDER_DRY = 1 << 9;
        const STREAM_RESET = 1 << 10;
    }
}

const EVENT_NAMES: [(&str, EventMask); 11] = [
    ("data_io", EventMask::DATA_IO),
    ("association", EventMask::ASSOCIATION),
    ("address", EventMask::ADDRESS),
    ("send_failure", EventMask::SEND_FAILURE),
    ("peer_error", EventMask::PEER_ERROR),
    ("shutdown", EventMask::SHUTDOWN),
    ("partial_delivery", EventMask::PARTIAL_DELIVERY),
    ("adaptation_layer", EventMask::ADAPTATION_LAYER),
    ("authentication", EventMask::AUTHENTICATION),
    ("sender_dry", EventMask::SENDER_DRY),
    ("stream_reset", EventMask::STREAM_RESET),
];

impl EventMask {
    /// 服务端默认订阅：数据辅助信息、关联、地址、发送失败与关闭事件。
    pub const SERVER_DEFAULT: EventMask = EventMask::DATA_IO
        .union(EventMask::ASSOCIATION)
        .union(EventMask::ADDRESS)
        .union(EventMask::SEND_FAILURE)
        .union(EventMask::SHUTDOWN);

    /// 由事件名列表构造；名称大小写不敏感，未知名称返回参数错误。
    pub fn from_names<I, S>(names: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        names.into_iter().try_fold(EventMask::empty(), |mask, name| {
            let name = name.as_ref().trim().to_ascii_lowercase();
            EVENT_NAMES
                .iter()
                .find(|(known, _)| *known == name)
                .map(|(_, flag)| mask | *flag)
                .ok_or_else(|| SctpError::argument(format!("unknown event name: {name:?}")))
        })
    }

    /// 已订阅事件的名称，顺序固定。
    pub fn names(self) -> Vec<&'static str> {
        EVENT_NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(name, _)| *name)
            .collect()
    }
}

/// 共享密钥（SCTP-AUTH）。
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AuthKey {
    pub association_id: i32,
    pub key_number: u16,
    pub key: Vec<u8>,
}

/// 共享密钥编号。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AuthKeyId {
    pub association_id: i32,
    pub key_number: u16,
}
