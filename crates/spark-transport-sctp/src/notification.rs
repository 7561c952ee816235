//! SCTP 通知解码器。
//!
//! # 模块定位（Why）
//! - SCTP 把控制事件（关联建立 / 断开、地址变化、发送失败等）与应用数据走同一条接收
//!   通道，仅通过接收标志区分。通知缓冲区是原生结构体的字节映像，必须经过严格的
//!   长度校验才能安全读取。
//! - 内核与 usrsctp 对同一事件使用不同的类型编号、状态编号与字段顺序；解码器本身与后端
//!   无关，差异集中在 [`NotificationDialect`] 常量中，由各后端提供。
//!
//! # 暴露接口（What）
//! - [`Notification`]：九种事件的标签联合。
//! - [`decode`]：把一次接收得到的字节解码为 [`Notification`]。
//!
//! # 设计要点（How）
//! - 先校验 8 字节通用头，再校验声明长度不超过实际读到的字节，最后校验声明长度覆盖该
//!   类型的固定部分；任何一步失败都返回 [`DecodeError`]，绝不越界读取。
//! - 尾随可变数据（关联变化的 info、远端错误与发送失败的 data）长度为
//!   `declared - fixed`，并受 `data_cap` 约束。
//! - 无法识别的状态值保留原始数值，标签统一为 `"unknown"`。

use std::fmt;

use crate::{address::SctpAddress, address::decode_sockaddr, error::DecodeError};

/// 通用头长度：type(u16) + flags(u16) + length(u32)。
pub const HEADER_LEN: usize = 8;

/// 尾随可变数据的默认上限。
pub const DEFAULT_DATA_CAP: usize = 8192;

const SOCKADDR_STORAGE_LEN: usize = crate::address::SOCKADDR_STORAGE_LEN;

/// 部分交付事件的字段顺序。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PartialDeliveryLayout {
    /// indication, assoc_id, stream, seq（内核；旧内核只到 assoc_id）。
    AssociationFirst,
    /// indication, stream, seq, assoc_id（usrsctp）。
    StreamFirst,
}

/// 通知类型编号。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NotificationTags {
    pub association_change: u16,
    pub peer_address_change: u16,
    pub send_failed: u16,
    pub remote_error: u16,
    pub shutdown: u16,
    pub partial_delivery: u16,
    pub adaptation: u16,
    pub authentication: u16,
    pub sender_dry: u16,
    pub send_failed_event: u16,
}

/// 某一后端的通知"方言"：类型编号、状态编号与布局差异。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct NotificationDialect {
    pub name: &'static str,
    pub tags: NotificationTags,
    /// comm up, comm lost, restart, shutdown complete, cannot start。
    pub association_states: [u16; 5],
    /// available, unreachable, removed, added, made primary, confirmed, potentially failed。
    pub peer_states: [u32; 7],
    pub partial_delivery_aborted: u32,
    /// new key, free key, no auth。
    pub auth_indications: [u32; 3],
    /// data unsent, data sent。
    pub send_failed_dispositions: [u16; 2],
    /// 旧式发送失败事件内嵌的 `sctp_sndrcvinfo` 大小。
    pub sndrcvinfo_len: usize,
    pub partial_delivery_layout: PartialDeliveryLayout,
}

/// Linux 内核 SCTP 的通知方言。
pub const KERNEL_DIALECT: NotificationDialect = NotificationDialect {
    name: "kernel",
    tags: NotificationTags {
        association_change: 0x8001,
        peer_address_change: 0x8002,
        send_failed: 0x8003,
        remote_error: 0x8004,
        shutdown: 0x8005,
        partial_delivery: 0x8006,
        adaptation: 0x8007,
        authentication: 0x8008,
        sender_dry: 0x8009,
        send_failed_event: 0x800d,
    },
    association_states: [0, 1, 2, 3, 4],
    peer_states: [0, 1, 2, 3, 4, 5, 6],
    partial_delivery_aborted: 0,
    auth_indications: [0, 1, 2],
    send_failed_dispositions: [0, 1],
    sndrcvinfo_len: 32,
    partial_delivery_layout: PartialDeliveryLayout::AssociationFirst,
};

/// usrsctp 的通知方言。
pub const USRSCTP_DIALECT: NotificationDialect = NotificationDialect {
    name: "usrsctp",
    tags: NotificationTags {
        association_change: 0x0001,
        peer_address_change: 0x0002,
        remote_error: 0x0003,
        send_failed: 0x0004,
        shutdown: 0x0005,
        adaptation: 0x0006,
        partial_delivery: 0x0007,
        authentication: 0x0008,
        sender_dry: 0x000a,
        send_failed_event: 0x000e,
    },
    association_states: [1, 2, 3, 4, 5],
    peer_states: [1, 2, 3, 4, 5, 6, 7],
    partial_delivery_aborted: 1,
    auth_indications: [1, 3, 2],
    send_failed_dispositions: [1, 2],
    sndrcvinfo_len: 128,
    partial_delivery_layout: PartialDeliveryLayout::StreamFirst,
};

/// 关联变化事件中的状态。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AssociationChangeState {
    CommUp,
    CommLost,
    Restart,
    ShutdownComplete,
    CannotStart,
    Unknown(u16),
}

impl AssociationChangeState {
    fn from_raw(raw: u16, dialect: &NotificationDialect) -> Self {
        const KNOWN: [AssociationChangeState; 5] = [
            AssociationChangeState::CommUp,
            AssociationChangeState::CommLost,
            AssociationChangeState::Restart,
            AssociationChangeState::ShutdownComplete,
            AssociationChangeState::CannotStart,
        ];
        dialect
            .association_states
            .iter()
            .position(|value| *value == raw)
            .map(|idx| KNOWN[idx])
            .unwrap_or(AssociationChangeState::Unknown(raw))
    }

    pub fn label(self) -> &'static str {
        match self {
            AssociationChangeState::CommUp => "comm up",
            AssociationChangeState::CommLost => "comm lost",
            AssociationChangeState::Restart => "restart",
            AssociationChangeState::ShutdownComplete => "shutdown complete",
            AssociationChangeState::CannotStart => "setup failed",
            AssociationChangeState::Unknown(_) => "unknown",
        }
    }
}

/// 对端地址变化事件中的状态。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PeerAddressState {
    Available,
    Unreachable,
    Removed,
    Added,
    MadePrimary,
    Confirmed,
    PotentiallyFailed,
    Unknown(u32),
}

impl PeerAddressState {
    fn from_raw(raw: u32, dialect: &NotificationDialect) -> Self {
        const KNOWN: [PeerAddressState; 7] = [
            PeerAddressState::Available,
            PeerAddressState::Unreachable,
            PeerAddressState::Removed,
            PeerAddressState::Added,
            PeerAddressState::MadePrimary,
            PeerAddressState::Confirmed,
            PeerAddressState::PotentiallyFailed,
        ];
        dialect
            .peer_states
            .iter()
            .position(|value| *value == raw)
            .map(|idx| KNOWN[idx])
            .unwrap_or(PeerAddressState::Unknown(raw))
    }

    pub fn label(self) -> &'static str {
        match self {
            PeerAddressState::Available => "available",
            PeerAddressState::Unreachable => "unreachable",
            PeerAddressState::Removed => "removed",
            PeerAddressState::Added => "added",
            PeerAddressState::MadePrimary => "made primary",
            PeerAddressState::Confirmed => "confirmed",
            PeerAddressState::PotentiallyFailed => "potentially failed",
            PeerAddressState::Unknown(_) => "unknown",
        }
    }
}

/// 发送失败时数据是否已经上线。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SendFailedDisposition {
    Unsent,
    Sent,
    Unknown(u16),
}

/// 部分交付事件的指示。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PartialDeliveryIndication {
    Aborted,
    Unknown(u32),
}

/// 认证密钥事件的指示。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AuthIndication {
    NewKey,
    FreeKey,
    NoAuth,
    Unknown(u32),
}

impl AuthIndication {
    fn from_raw(raw: u32, dialect: &NotificationDialect) -> Self {
        match dialect.auth_indications.iter().position(|value| *value == raw) {
            Some(0) => AuthIndication::NewKey,
            Some(1) => AuthIndication::FreeKey,
            Some(2) => AuthIndication::NoAuth,
            _ => AuthIndication::Unknown(raw),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssociationChange {
    pub flags: u16,
    pub state: AssociationChangeState,
    pub error: u16,
    pub outbound_streams: u16,
    pub inbound_streams: u16,
    pub association_id: i32,
    pub info: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerAddressChange {
    pub flags: u16,
    pub address: Option<SctpAddress>,
    pub state: PeerAddressState,
    pub error: u32,
    pub association_id: i32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteError {
    pub flags: u16,
    pub error: u16,
    pub association_id: i32,
    pub data: Vec<u8>,
}

/// 发送失败消息的原始发送参数。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FailedSendInfo {
    pub stream: u16,
    pub flags: u16,
    pub ppid: u32,
    pub context: u32,
    pub association_id: i32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SendFailed {
    pub disposition: SendFailedDisposition,
    pub error: u32,
    pub info: FailedSendInfo,
    pub association_id: i32,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Shutdown {
    pub flags: u16,
    pub association_id: i32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AdaptationIndication {
    pub flags: u16,
    pub indication: u32,
    pub association_id: i32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PartialDelivery {
    pub flags: u16,
    pub indication: PartialDeliveryIndication,
    /// 旧内核的事件不携带流号与序号。
    pub stream: Option<u32>,
    pub sequence: Option<u32>,
    pub association_id: i32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AuthenticationKey {
    pub flags: u16,
    pub key_number: u16,
    pub indication: AuthIndication,
    pub association_id: i32,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SenderDry {
    pub flags: u16,
    pub association_id: i32,
}

/// 解码后的通知，只是不可变快照，不持有任何后端资源。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Notification {
    AssociationChange(AssociationChange),
    PeerAddressChange(PeerAddressChange),
    RemoteError(RemoteError),
    SendFailed(SendFailed),
    Shutdown(Shutdown),
    AdaptationIndication(AdaptationIndication),
    PartialDelivery(PartialDelivery),
    AuthenticationKey(AuthenticationKey),
    SenderDry(SenderDry),
}

/// 通知种类，便于日志与匹配。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum NotificationKind {
    AssociationChange,
    PeerAddressChange,
    RemoteError,
    SendFailed,
    Shutdown,
    AdaptationIndication,
    PartialDelivery,
    AuthenticationKey,
    SenderDry,
}

impl fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NotificationKind::AssociationChange => "association change",
            NotificationKind::PeerAddressChange => "peer address change",
            NotificationKind::RemoteError => "remote error",
            NotificationKind::SendFailed => "send failed",
            NotificationKind::Shutdown => "shutdown",
            NotificationKind::AdaptationIndication => "adaptation indication",
            NotificationKind::PartialDelivery => "partial delivery",
            NotificationKind::AuthenticationKey => "authentication key",
            NotificationKind::SenderDry => "sender dry",
        };
        f.write_str(name)
    }
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::AssociationChange(_) => NotificationKind::AssociationChange,
            Notification::PeerAddressChange(_) => NotificationKind::PeerAddressChange,
            Notification::RemoteError(_) => NotificationKind::RemoteError,
            Notification::SendFailed(_) => NotificationKind::SendFailed,
            Notification::Shutdown(_) => NotificationKind::Shutdown,
            Notification::AdaptationIndication(_) => NotificationKind::AdaptationIndication,
            Notification::PartialDelivery(_) => NotificationKind::PartialDelivery,
            Notification::AuthenticationKey(_) => NotificationKind::AuthenticationKey,
            Notification::SenderDry(_) => NotificationKind::SenderDry,
        }
    }

    pub fn association_id(&self) -> i32 {
        match self {
            Notification::AssociationChange(event) => event.association_id,
            Notification::PeerAddressChange(event) => event.association_id,
            Notification::RemoteError(event) => event.association_id,
            Notification::SendFailed(event) => event.association_id,
            Notification::Shutdown(event) => event.association_id,
            Notification::AdaptationIndication(event) => event.association_id,
            Notification::PartialDelivery(event) => event.association_id,
            Notification::AuthenticationKey(event) => event.association_id,
            Notification::SenderDry(event) => event.association_id,
        }
    }

    /// 状态标签；仅关联变化与对端地址变化事件带有状态。
    pub fn state_label(&self) -> Option<&'static str> {
        match self {
            Notification::AssociationChange(event) => Some(event.state.label()),
            Notification::PeerAddressChange(event) => Some(event.state.label()),
            _ => None,
        }
    }
}

/// 按默认数据上限解码。
pub fn decode(buf: &[u8], dialect: &NotificationDialect) -> Result<Notification, DecodeError> {
    decode_with_cap(buf, dialect, DEFAULT_DATA_CAP)
}

/// 解码一条通知，尾随数据不超过 `data_cap` 字节。
pub fn decode_with_cap(
    buf: &[u8],
    dialect: &NotificationDialect,
    data_cap: usize,
) -> Result<Notification, DecodeError> {
    if buf.len() < HEADER_LEN {
        return Err(DecodeError::TruncatedHeader {
            needed: HEADER_LEN,
            actual: buf.len(),
        });
    }
    let tag = read_u16(buf, 0);
    let declared = read_u32(buf, 4) as usize;
    if declared > buf.len() {
        return Err(DecodeError::LengthExceedsBuffer {
            declared,
            actual: buf.len(),
        });
    }
    let frame = Frame {
        tag,
        flags: read_u16(buf, 2),
        body: &buf[..declared],
        data_cap,
    };
    let tags = &dialect.tags;

    if tag == tags.association_change {
        frame.require(20)?;
        Ok(Notification::AssociationChange(AssociationChange {
            flags: frame.flags,
            state: AssociationChangeState::from_raw(frame.u16(8), dialect),
            error: frame.u16(10),
            outbound_streams: frame.u16(12),
            inbound_streams: frame.u16(14),
            association_id: frame.i32(16),
            info: frame.trailing(20),
        }))
    } else if tag == tags.peer_address_change {
        let state_at = HEADER_LEN + SOCKADDR_STORAGE_LEN;
        frame.require(state_at + 12)?;
        Ok(Notification::PeerAddressChange(PeerAddressChange {
            flags: frame.flags,
            address: decode_sockaddr(&frame.body[HEADER_LEN..state_at])
                .map(|(addr, _)| SctpAddress::from(addr)),
            state: PeerAddressState::from_raw(frame.u32(state_at), dialect),
            error: frame.u32(state_at + 4),
            association_id: frame.i32(state_at + 8),
        }))
    } else if tag == tags.remote_error {
        frame.require(16)?;
        Ok(Notification::RemoteError(RemoteError {
            flags: frame.flags,
            error: frame.u16(8),
            association_id: frame.i32(12),
            data: frame.trailing(16),
        }))
    } else if tag == tags.send_failed {
        let assoc_at = 12 + dialect.sndrcvinfo_len;
        frame.require(assoc_at + 4)?;
        Ok(Notification::SendFailed(SendFailed {
            disposition: disposition(frame.flags, dialect),
            error: frame.u32(8),
            info: FailedSendInfo {
                stream: frame.u16(12),
                flags: frame.u16(16),
                ppid: frame.u32(20),
                context: frame.u32(24),
                association_id: frame.i32(40),
            },
            association_id: frame.i32(assoc_at),
            data: frame.trailing(assoc_at + 4),
        }))
    } else if tag == tags.send_failed_event {
        frame.require(32)?;
        Ok(Notification::SendFailed(SendFailed {
            disposition: disposition(frame.flags, dialect),
            error: frame.u32(8),
            info: FailedSendInfo {
                stream: frame.u16(12),
                flags: frame.u16(14),
                ppid: frame.u32(16),
                context: frame.u32(20),
                association_id: frame.i32(24),
            },
            association_id: frame.i32(28),
            data: frame.trailing(32),
        }))
    } else if tag == tags.shutdown {
        frame.require(12)?;
        Ok(Notification::Shutdown(Shutdown {
            flags: frame.flags,
            association_id: frame.i32(8),
        }))
    } else if tag == tags.adaptation {
        frame.require(16)?;
        Ok(Notification::AdaptationIndication(AdaptationIndication {
            flags: frame.flags,
            indication: frame.u32(8),
            association_id: frame.i32(12),
        }))
    } else if tag == tags.partial_delivery {
        decode_partial_delivery(&frame, dialect)
    } else if tag == tags.authentication {
        frame.require(20)?;
        let raw = frame.u32(12);
        Ok(Notification::AuthenticationKey(AuthenticationKey {
            flags: frame.flags,
            key_number: frame.u16(8),
            indication: AuthIndication::from_raw(raw, dialect),
            association_id: frame.i32(16),
        }))
    } else if tag == tags.sender_dry {
        frame.require(12)?;
        Ok(Notification::SenderDry(SenderDry {
            flags: frame.flags,
            association_id: frame.i32(8),
        }))
    } else {
        Err(DecodeError::UnsupportedType { tag })
    }
}

fn decode_partial_delivery(
    frame: &Frame<'_>,
    dialect: &NotificationDialect,
) -> Result<Notification, DecodeError> {
    let raw = frame.u32(8);
    let indication = if raw == dialect.partial_delivery_aborted {
        PartialDeliveryIndication::Aborted
    } else {
        PartialDeliveryIndication::Unknown(raw)
    };
    let event = match dialect.partial_delivery_layout {
        PartialDeliveryLayout::AssociationFirst => {
            frame.require(16)?;
            let extended = frame.body.len() >= 24;
            PartialDelivery {
                flags: frame.flags,
                indication,
                stream: extended.then(|| frame.u32(16)),
                sequence: extended.then(|| frame.u32(20)),
                association_id: frame.i32(12),
            }
        }
        PartialDeliveryLayout::StreamFirst => {
            frame.require(24)?;
            PartialDelivery {
                flags: frame.flags,
                indication,
                stream: Some(frame.u32(12)),
                sequence: Some(frame.u32(16)),
                association_id: frame.i32(20),
            }
        }
    };
    Ok(Notification::PartialDelivery(event))
}

fn disposition(flags: u16, dialect: &NotificationDialect) -> SendFailedDisposition {
    let [unsent, sent] = dialect.send_failed_dispositions;
    if flags == unsent {
        SendFailedDisposition::Unsent
    } else if flags == sent {
        SendFailedDisposition::Sent
    } else {
        SendFailedDisposition::Unknown(flags)
    }
}

/// 已通过"声明长度 ≤ 实际长度"校验的通知帧。
struct Frame<'a> {
    tag: u16,
    flags: u16,
    body: &'a [u8],
    data_cap: usize,
}

impl Frame<'_> {
    fn require(&self, needed: usize) -> Result<(), DecodeError> {
        if self.body.len() < needed {
            return Err(DecodeError::FixedPartMissing {
                tag: self.tag,
                needed,
                declared: self.body.len(),
            });
        }
        Ok(())
    }

    fn u16(&self, offset: usize) -> u16 {
        read_u16(self.body, offset)
    }

    fn u32(&self, offset: usize) -> u32 {
        read_u32(self.body, offset)
    }

    fn i32(&self, offset: usize) -> i32 {
        read_u32(self.body, offset) as i32
    }

    fn trailing(&self, fixed: usize) -> Vec<u8> {
        let available = self.body.len().saturating_sub(fixed);
        let len = available.min(self.data_cap);
        self.body
            .get(fixed..fixed + len)
            .map(<[u8]>::to_vec)
            .unwrap_or_default()
    }
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    buf.get(offset..offset + 2)
        .map(|bytes| u16::from_ne_bytes([bytes[0], bytes[1]]))
        .unwrap_or(0)
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    buf.get(offset..offset + 4)
        .map(|bytes| u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .unwrap_or(0)
}
