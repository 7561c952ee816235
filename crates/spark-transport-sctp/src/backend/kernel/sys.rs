//! Linux 内核 SCTP 的原生常量与结构体布局（`uapi/linux/sctp.h`）。

use nix::libc::c_int;

use crate::{
    address::SOCKADDR_STORAGE_LEN,
    backend::{
        RecvInfo,
        layout::{StructReader, StructWriter},
    },
    capability::{SendFailureNaming, SubscriptionLayout},
    error::{Result, SctpError},
    message::{RecvInfoFlags, SendFlags, SendParams},
    options::{
        AssociationState, EventMask, PathState, PeerAddressFlags, PeerAddressInfo,
        PeerAddressParams, SendInfo, Status,
    },
};

pub(super) const IPPROTO_SCTP: c_int = 132;
pub(super) const SOL_SCTP: c_int = 132;

pub(super) const SCTP_RTOINFO: c_int = 0;
pub(super) const SCTP_ASSOCINFO: c_int = 1;
pub(super) const SCTP_INITMSG: c_int = 2;
pub(super) const SCTP_NODELAY: c_int = 3;
pub(super) const SCTP_AUTOCLOSE: c_int = 4;
pub(super) const SCTP_DISABLE_FRAGMENTS: c_int = 8;
pub(super) const SCTP_PEER_ADDR_PARAMS: c_int = 9;
pub(super) const SCTP_DEFAULT_SEND_PARAM: c_int = 10;
pub(super) const SCTP_EVENTS: c_int = 11;
pub(super) const SCTP_I_WANT_MAPPED_V4_ADDR: c_int = 12;
pub(super) const SCTP_MAXSEG: c_int = 13;
pub(super) const SCTP_STATUS: c_int = 14;
pub(super) const SCTP_AUTH_KEY: c_int = 23;
pub(super) const SCTP_AUTH_ACTIVE_KEY: c_int = 24;
pub(super) const SCTP_AUTH_DELETE_KEY: c_int = 25;
pub(super) const SCTP_RECVRCVINFO: c_int = 32;
pub(super) const SCTP_AUTH_DEACTIVATE_KEY: c_int = 35;
pub(super) const SCTP_AUTH_SUPPORTED: c_int = 129;

pub(super) const SCTP_SOCKOPT_BINDX_ADD: c_int = 100;
pub(super) const SCTP_SOCKOPT_BINDX_REM: c_int = 101;
pub(super) const SCTP_SOCKOPT_PEELOFF: c_int = 102;
pub(super) const SCTP_GET_PEER_ADDRS: c_int = 108;
pub(super) const SCTP_GET_LOCAL_ADDRS: c_int = 109;
pub(super) const SCTP_SOCKOPT_CONNECTX: c_int = 110;
pub(super) const SCTP_SOCKOPT_PEELOFF_FLAGS: c_int = 122;

/// 辅助数据类型。
pub(super) const SCTP_SNDRCV: c_int = 1;
pub(super) const SCTP_RCVINFO: c_int = 3;
pub(super) const SCTP_DSTADDRV4: c_int = 7;
pub(super) const SCTP_DSTADDRV6: c_int = 8;

pub(super) const MSG_NOTIFICATION: c_int = 0x8000;

const SCTP_UNORDERED: u16 = 1 << 0;
const SCTP_ADDR_OVER: u16 = 1 << 1;
const SCTP_ABORT: u16 = 1 << 2;
const SCTP_SACK_IMMEDIATELY: u16 = 1 << 3;
const SCTP_SENDALL: u16 = 1 << 6;
const SCTP_EOF: u16 = nix::libc::MSG_FIN as u16;
const SCTP_PR_SCTP_TTL: u16 = 0x0010;
const SCTP_PR_SCTP_RTX: u16 = 0x0020;
const SCTP_PR_SCTP_PRIO: u16 = 0x0030;
const SCTP_PR_SCTP_MASK: u16 = 0x0030;

/// `sctp_sndrcvinfo` 的大小。
pub(super) const SNDRCVINFO_LEN: usize = 32;
/// `sctp_paddrinfo`（packed, aligned(4)）的大小。
const PADDRINFO_LEN: usize = 152;
/// `sctp_status` 的大小。
pub(super) const STATUS_LEN: usize = 24 + PADDRINFO_LEN;
/// `sctp_paddrparams`（packed, aligned(4)）的大小。
pub(super) const PADDRPARAMS_LEN: usize = 156;
/// `sctp_getaddrs` 头部：assoc_id + addr_num。
pub(super) const GETADDRS_HEADER_LEN: usize = 8;
/// `sctp_peeloff_arg_t`：assoc_id + sd。
pub(super) const PEELOFF_ARG_LEN: usize = 8;
/// `sctp_peeloff_flags_arg_t`：`sctp_peeloff_arg_t` + flags。
pub(super) const PEELOFF_FLAGS_ARG_LEN: usize = 12;

/// 剥离参数；内核把新描述符写回偏移 4。`cloexec` 为真时附带 `O_CLOEXEC`。
pub(super) fn encode_peeloff(association_id: i32, cloexec: bool) -> Vec<u8> {
    let len = if cloexec {
        PEELOFF_FLAGS_ARG_LEN
    } else {
        PEELOFF_ARG_LEN
    };
    let mut arg = vec![0u8; len];
    arg[..4].copy_from_slice(&association_id.to_ne_bytes());
    if cloexec {
        arg[8..].copy_from_slice(&(nix::libc::O_CLOEXEC as u32).to_ne_bytes());
    }
    arg
}

/// 逻辑发送标志 → `sinfo_flags`。
pub(super) fn native_send_flags(flags: SendFlags, ttl_ms: u32) -> u16 {
    let mut native = 0;
    for (logical, bit) in [
        (SendFlags::UNORDERED, SCTP_UNORDERED),
        (SendFlags::ADDR_OVER, SCTP_ADDR_OVER),
        (SendFlags::ABORT, SCTP_ABORT),
        (SendFlags::SACK_IMMEDIATELY, SCTP_SACK_IMMEDIATELY),
        (SendFlags::SENDALL, SCTP_SENDALL),
        (SendFlags::EOF, SCTP_EOF),
    ] {
        if flags.contains(logical) {
            native |= bit;
        }
    }
    native
        | match flags.effective_policy(ttl_ms) {
            crate::message::PrPolicy::Reliable => 0,
            crate::message::PrPolicy::Ttl => SCTP_PR_SCTP_TTL,
            crate::message::PrPolicy::Retransmissions => SCTP_PR_SCTP_RTX,
            crate::message::PrPolicy::Priority => SCTP_PR_SCTP_PRIO,
        }
}

/// `sinfo_flags` → 逻辑发送标志。
pub(super) fn logical_send_flags(native: u16) -> SendFlags {
    let mut flags = SendFlags::empty();
    for (logical, bit) in [
        (SendFlags::UNORDERED, SCTP_UNORDERED),
        (SendFlags::ADDR_OVER, SCTP_ADDR_OVER),
        (SendFlags::ABORT, SCTP_ABORT),
        (SendFlags::SACK_IMMEDIATELY, SCTP_SACK_IMMEDIATELY),
        (SendFlags::SENDALL, SCTP_SENDALL),
        (SendFlags::EOF, SCTP_EOF),
    ] {
        if native & bit != 0 {
            flags |= logical;
        }
    }
    flags
        | match native & SCTP_PR_SCTP_MASK {
            SCTP_PR_SCTP_TTL => SendFlags::PR_TTL,
            SCTP_PR_SCTP_RTX => SendFlags::PR_RTX,
            SCTP_PR_SCTP_PRIO => SendFlags::PR_PRIO,
            _ => SendFlags::empty(),
        }
}

/// 构造发送用 `sctp_sndrcvinfo`。
pub(super) fn encode_sndrcvinfo(params: &SendParams) -> Vec<u8> {
    StructWriter::new()
        .u16(params.stream)
        .u16(0)
        .u16(native_send_flags(params.flags, params.ttl_ms))
        .pad(2)
        .u32(params.ppid)
        .u32(params.context)
        .u32(params.ttl_ms)
        .u32(0)
        .u32(0)
        .i32(params.association_id)
        .finish()
}

pub(super) fn encode_default_send(info: &SendInfo) -> Vec<u8> {
    StructWriter::new()
        .u16(info.stream)
        .u16(0)
        .u16(native_send_flags(info.flags, info.ttl_ms))
        .pad(2)
        .u32(info.ppid)
        .u32(info.context)
        .u32(info.ttl_ms)
        .u32(0)
        .u32(0)
        .i32(info.association_id)
        .finish()
}

/// 读取默认发送参数时的输入：只填 assoc_id。
pub(super) fn default_send_query(association_id: i32) -> Vec<u8> {
    StructWriter::new()
        .pad(28)
        .i32(association_id)
        .finish()
}

pub(super) fn decode_default_send(bytes: &[u8]) -> SendInfo {
    let r = StructReader::new(bytes);
    SendInfo {
        stream: r.u16(0),
        flags: logical_send_flags(r.u16(4)),
        ppid: r.u32(8),
        context: r.u32(12),
        ttl_ms: r.u32(16),
        association_id: r.i32(28),
    }
}

fn association_state(raw: i32) -> AssociationState {
    match raw {
        0 => AssociationState::Empty,
        1 => AssociationState::Closed,
        2 => AssociationState::CookieWait,
        3 => AssociationState::CookieEchoed,
        4 => AssociationState::Established,
        5 => AssociationState::ShutdownPending,
        6 => AssociationState::ShutdownSent,
        7 => AssociationState::ShutdownReceived,
        8 => AssociationState::ShutdownAckSent,
        other => AssociationState::Unknown(other),
    }
}

fn path_state(raw: i32) -> PathState {
    match raw {
        0 => PathState::Inactive,
        1 => PathState::PotentiallyFailed,
        2 => PathState::Active,
        3 => PathState::Unconfirmed,
        other => PathState::Unknown(other),
    }
}

pub(super) fn status_query(association_id: i32) -> Vec<u8> {
    StructWriter::new()
        .i32(association_id)
        .pad(STATUS_LEN - 4)
        .finish()
}

/// 解码 `sctp_status`；主路径 `sctp_paddrinfo` 位于偏移 24。
pub(super) fn decode_status(bytes: &[u8]) -> Status {
    let r = StructReader::new(bytes);
    let primary = 24;
    let state_at = primary + 4 + SOCKADDR_STORAGE_LEN;
    Status {
        association_id: r.i32(0),
        state: association_state(r.i32(4)),
        receive_window: r.u32(8),
        unacked_data: r.u16(12),
        pending_data: r.u16(14),
        inbound_streams: r.u16(16),
        outbound_streams: r.u16(18),
        fragmentation_point: r.u32(20),
        primary: PeerAddressInfo {
            association_id: r.i32(primary),
            address: r.sockaddr(primary + 4),
            state: path_state(r.i32(state_at)),
            cwnd: r.u32(state_at + 4),
            srtt: r.u32(state_at + 8),
            rto: r.u32(state_at + 12),
            mtu: r.u32(state_at + 16),
        },
    }
}

/// `sctp_paddrparams`：assoc_id, address, hbinterval, pathmaxrxt(u16), pathmtu, sackdelay,
/// flags, ipv6_flowlabel, dscp，紧凑排列后补齐到 4 字节。
pub(super) fn encode_paddrparams(params: &PeerAddressParams) -> Vec<u8> {
    StructWriter::new()
        .i32(params.association_id)
        .sockaddr_storage(params.address.as_ref())
        .u32(params.heartbeat_interval)
        .u16(params.path_max_retransmissions)
        .u32(params.path_mtu)
        .u32(params.sack_delay)
        .u32(params.flags.bits())
        .u32(0)
        .u8(0)
        .pad(1)
        .finish()
}

pub(super) fn decode_paddrparams(bytes: &[u8]) -> PeerAddressParams {
    let r = StructReader::new(bytes);
    let after_addr = 4 + SOCKADDR_STORAGE_LEN;
    PeerAddressParams {
        association_id: r.i32(0),
        address: r.sockaddr(4).map(Into::into),
        heartbeat_interval: r.u32(after_addr),
        path_max_retransmissions: r.u16(after_addr + 4),
        path_mtu: r.u32(after_addr + 6),
        sack_delay: r.u32(after_addr + 10),
        flags: PeerAddressFlags::from_bits_truncate(r.u32(after_addr + 14)),
    }
}

/// 接收侧 `SCTP_SNDRCV` 辅助数据（订阅 data_io 事件且未启用 `SCTP_RECVRCVINFO` 时出现）。
pub(super) fn decode_sndrcvinfo(bytes: &[u8]) -> RecvInfo {
    let r = StructReader::new(bytes);
    let mut flags = RecvInfoFlags::empty();
    if r.u16(4) & SCTP_UNORDERED != 0 {
        flags |= RecvInfoFlags::UNORDERED;
    }
    RecvInfo {
        stream: r.u16(0),
        ssn: r.u16(2),
        flags,
        ppid: r.u32(8),
        context: r.u32(12),
        ttl: r.u32(16),
        tsn: r.u32(20),
        cumtsn: r.u32(24),
        association_id: r.i32(28),
    }
}

pub(super) const RCVINFO_UNORDERED: u16 = SCTP_UNORDERED;

/// `sctp_event_subscribe` 中各事件所在的字节下标。
const EVENT_SLOTS: [(EventMask, usize); 11] = [
    (EventMask::DATA_IO, 0),
    (EventMask::ASSOCIATION, 1),
    (EventMask::ADDRESS, 2),
    (EventMask::SEND_FAILURE, 3),
    (EventMask::PEER_ERROR, 4),
    (EventMask::SHUTDOWN, 5),
    (EventMask::PARTIAL_DELIVERY, 6),
    (EventMask::ADAPTATION_LAYER, 7),
    (EventMask::AUTHENTICATION, 8),
    (EventMask::SENDER_DRY, 9),
    (EventMask::STREAM_RESET, 10),
];

/// 新命名下 `sctp_send_failure_event_event` 的下标。
const SEND_FAILURE_EVENT_SLOT: usize = 13;

fn event_slot(event: EventMask, layout: SubscriptionLayout) -> Option<usize> {
    if event == EventMask::SEND_FAILURE && layout.send_failure == SendFailureNaming::Event {
        return Some(SEND_FAILURE_EVENT_SLOT);
    }
    EVENT_SLOTS
        .iter()
        .find(|(flag, _)| *flag == event)
        .map(|(_, slot)| *slot)
        .filter(|slot| *slot < layout.struct_len())
}

/// 按能力截取后的 `sctp_event_subscribe`；平台不提供的事件返回参数错误。
pub(super) fn encode_event_subscribe(mask: EventMask, layout: SubscriptionLayout) -> Result<Vec<u8>> {
    let mut bytes = vec![0u8; layout.struct_len()];
    for event in mask.iter() {
        let slot = event_slot(event, layout).ok_or_else(|| {
            SctpError::argument(format!(
                "event {:?} is not available on this platform",
                event.names()
            ))
        })?;
        bytes[slot] = 1;
    }
    Ok(bytes)
}

pub(super) fn decode_event_subscribe(bytes: &[u8], layout: SubscriptionLayout) -> EventMask {
    EVENT_SLOTS
        .iter()
        .filter_map(|(event, _)| {
            let slot = event_slot(*event, layout)?;
            (bytes.get(slot).copied().unwrap_or(0) != 0).then_some(*event)
        })
        .fold(EventMask::empty(), |mask, event| mask | event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::SendFailureNaming;

    fn layout(send_failure: SendFailureNaming) -> SubscriptionLayout {
        SubscriptionLayout {
            send_failure,
            sender_dry: true,
            stream_reset: true,
        }
    }

    #[test]
    fn peeloff_flags_carry_cloexec() {
        let arg = encode_peeloff(7, true);
        assert_eq!(arg.len(), PEELOFF_FLAGS_ARG_LEN);
        assert_eq!(&arg[..4], &7i32.to_ne_bytes());
        assert_eq!(&arg[4..8], &[0; 4]);
        assert_eq!(&arg[8..], &(nix::libc::O_CLOEXEC as u32).to_ne_bytes());

        let legacy = encode_peeloff(7, false);
        assert_eq!(legacy.len(), PEELOFF_ARG_LEN);
        assert_eq!(&legacy[..4], &7i32.to_ne_bytes());
    }

    /// 新命名把"发送失败"写入第 14 个字节，旧命名写入第 4 个字节。
    #[test]
    fn send_failure_subscription_follows_naming() {
        let legacy = encode_event_subscribe(EventMask::SEND_FAILURE, layout(SendFailureNaming::Legacy))
            .expect("legacy");
        assert_eq!(legacy.len(), 11);
        assert_eq!(legacy[3], 1);

        let renamed = encode_event_subscribe(EventMask::SEND_FAILURE, layout(SendFailureNaming::Event))
            .expect("renamed");
        assert_eq!(renamed.len(), 14);
        assert_eq!(renamed[3], 0);
        assert_eq!(renamed[13], 1);
        assert_eq!(
            decode_event_subscribe(&renamed, layout(SendFailureNaming::Event)),
            EventMask::SEND_FAILURE
        );
    }

    #[test]
    fn missing_event_capability_is_argument_error() {
        let narrow = SubscriptionLayout {
            send_failure: SendFailureNaming::Legacy,
            sender_dry: false,
            stream_reset: false,
        };
        let err = encode_event_subscribe(EventMask::SENDER_DRY, narrow).expect_err("dry");
        assert!(err.is_argument());
        let bytes = encode_event_subscribe(EventMask::SERVER_DEFAULT, narrow).expect("default");
        assert_eq!(decode_event_subscribe(&bytes, narrow), EventMask::SERVER_DEFAULT);
    }

    #[test]
    fn struct_sizes_match_uapi() {
        assert_eq!(encode_sndrcvinfo(&SendParams::default()).len(), SNDRCVINFO_LEN);
        assert_eq!(
            encode_paddrparams(&PeerAddressParams::default()).len(),
            PADDRPARAMS_LEN
        );
        assert_eq!(status_query(0).len(), STATUS_LEN);
        assert_eq!(default_send_query(7).len(), SNDRCVINFO_LEN);
    }

    /// `ttl > 0` 时自动附加 TTL 策略位。
    #[test]
    fn send_flags_translate_to_sinfo_flags() {
        let native = native_send_flags(SendFlags::UNORDERED | SendFlags::EOF, 100);
        assert_eq!(native, SCTP_UNORDERED | SCTP_EOF | SCTP_PR_SCTP_TTL);
        assert_eq!(
            logical_send_flags(native),
            SendFlags::UNORDERED | SendFlags::EOF | SendFlags::PR_TTL
        );
    }

    #[test]
    fn default_send_round_trips_through_layout() {
        let info = SendInfo {
            stream: 4,
            flags: SendFlags::UNORDERED,
            ppid: 51,
            context: 9,
            ttl_ms: 0,
            association_id: 12,
        };
        assert_eq!(decode_default_send(&encode_default_send(&info)), info);
    }

    #[test]
    fn paddrparams_offsets() {
        let params = PeerAddressParams {
            association_id: 5,
            address: Some("127.0.0.1:9".parse().expect("addr")),
            heartbeat_interval: 30000,
            path_max_retransmissions: 5,
            path_mtu: 1400,
            sack_delay: 200,
            flags: PeerAddressFlags::HB_ENABLE | PeerAddressFlags::SACKDELAY_ENABLE,
        };
        assert_eq!(decode_paddrparams(&encode_paddrparams(&params)), params);
    }
}
