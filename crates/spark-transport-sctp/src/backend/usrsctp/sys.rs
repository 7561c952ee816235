//! usrsctp 的外部函数声明、常量与结构体布局（`usrsctp.h`）。

use std::ffi::c_void;

use nix::libc::{c_int, c_uint, size_t, sockaddr, socklen_t, ssize_t};

use crate::{
    address::SOCKADDR_STORAGE_LEN,
    backend::layout::{StructReader, StructWriter},
    error::{Result, SctpError},
    message::{PrPolicy, SendFlags, SendParams},
    options::{
        AssocParams, AssociationState, PathState, PeerAddressFlags, PeerAddressInfo,
        PeerAddressParams, SendInfo, Status,
    },
};

/// usrsctp 内部的 `struct socket`，只以指针形式出现。
#[repr(C)]
pub(super) struct RawSocket {
    _private: [u8; 0],
}

/// 回调式 API 不在使用范围内，回调参数恒为空，这里只声明为不透明的函数指针。
type UnusedCallback = Option<unsafe extern "C" fn()>;

#[link(name = "usrsctp")]
unsafe extern "C" {
    pub(super) fn usrsctp_init(
        port: u16,
        conn_output: UnusedCallback,
        debug_printf: UnusedCallback,
    );
    pub(super) fn usrsctp_finish() -> c_int;
    pub(super) fn usrsctp_socket(
        domain: c_int,
        kind: c_int,
        protocol: c_int,
        receive_cb: UnusedCallback,
        send_cb: UnusedCallback,
        sb_threshold: u32,
        ulp_info: *mut c_void,
    ) -> *mut RawSocket;
    pub(super) fn usrsctp_close(so: *mut RawSocket);
    pub(super) fn usrsctp_shutdown(so: *mut RawSocket, how: c_int) -> c_int;
    pub(super) fn usrsctp_bind(so: *mut RawSocket, name: *mut sockaddr, namelen: socklen_t) -> c_int;
    pub(super) fn usrsctp_bindx(
        so: *mut RawSocket,
        addrs: *mut sockaddr,
        addrcnt: c_int,
        flags: c_int,
    ) -> c_int;
    pub(super) fn usrsctp_connectx(
        so: *mut RawSocket,
        addrs: *const sockaddr,
        addrcnt: c_int,
        id: *mut u32,
    ) -> c_int;
    pub(super) fn usrsctp_listen(so: *mut RawSocket, backlog: c_int) -> c_int;
    pub(super) fn usrsctp_peeloff(so: *mut RawSocket, id: u32) -> *mut RawSocket;
    pub(super) fn usrsctp_set_non_blocking(so: *mut RawSocket, onoff: c_int) -> c_int;
    pub(super) fn usrsctp_setsockopt(
        so: *mut RawSocket,
        level: c_int,
        option_name: c_int,
        option_value: *const c_void,
        option_len: socklen_t,
    ) -> c_int;
    pub(super) fn usrsctp_getsockopt(
        so: *mut RawSocket,
        level: c_int,
        option_name: c_int,
        option_value: *mut c_void,
        option_len: *mut socklen_t,
    ) -> c_int;
    pub(super) fn usrsctp_getladdrs(so: *mut RawSocket, id: u32, raddrs: *mut *mut sockaddr) -> c_int;
    pub(super) fn usrsctp_freeladdrs(addrs: *mut sockaddr);
    pub(super) fn usrsctp_getpaddrs(so: *mut RawSocket, id: u32, raddrs: *mut *mut sockaddr) -> c_int;
    pub(super) fn usrsctp_freepaddrs(addrs: *mut sockaddr);
    pub(super) fn usrsctp_sendv(
        so: *mut RawSocket,
        data: *const c_void,
        len: size_t,
        to: *mut sockaddr,
        addrcnt: c_int,
        info: *mut c_void,
        infolen: socklen_t,
        infotype: c_uint,
        flags: c_int,
    ) -> ssize_t;
    pub(super) fn usrsctp_recvv(
        so: *mut RawSocket,
        dbuf: *mut c_void,
        len: size_t,
        from: *mut sockaddr,
        fromlen: *mut socklen_t,
        info: *mut c_void,
        infolen: *mut socklen_t,
        infotype: *mut c_uint,
        msg_flags: *mut c_int,
    ) -> ssize_t;
}

pub(super) const IPPROTO_SCTP: c_int = 132;

pub(super) const SCTP_RTOINFO: c_int = 0x01;
pub(super) const SCTP_ASSOCINFO: c_int = 0x02;
pub(super) const SCTP_INITMSG: c_int = 0x03;
pub(super) const SCTP_NODELAY: c_int = 0x04;
pub(super) const SCTP_AUTOCLOSE: c_int = 0x05;
pub(super) const SCTP_DISABLE_FRAGMENTS: c_int = 0x09;
pub(super) const SCTP_PEER_ADDR_PARAMS: c_int = 0x0a;
pub(super) const SCTP_I_WANT_MAPPED_V4_ADDR: c_int = 0x0d;
pub(super) const SCTP_MAXSEG: c_int = 0x0e;
pub(super) const SCTP_AUTH_KEY: c_int = 0x13;
pub(super) const SCTP_AUTH_ACTIVE_KEY: c_int = 0x15;
pub(super) const SCTP_AUTH_DELETE_KEY: c_int = 0x16;
pub(super) const SCTP_AUTH_DEACTIVATE_KEY: c_int = 0x1d;
pub(super) const SCTP_EVENT: c_int = 0x1e;
pub(super) const SCTP_RECVRCVINFO: c_int = 0x1f;
pub(super) const SCTP_DEFAULT_SNDINFO: c_int = 0x21;
pub(super) const SCTP_REMOTE_UDP_ENCAPS_PORT: c_int = 0x24;
pub(super) const SCTP_AUTH_SUPPORTED: c_int = 0x27;
pub(super) const SCTP_STATUS: c_int = 0x100;

pub(super) const SCTP_BINDX_ADD_ADDR: c_int = 0x8001;
pub(super) const SCTP_BINDX_REM_ADDR: c_int = 0x8002;

pub(super) const SCTP_FUTURE_ASSOC: u32 = 0;
pub(super) const SCTP_ALL_ASSOC: u32 = 2;

pub(super) const MSG_NOTIFICATION: c_int = 0x2000;

pub(super) const SCTP_SENDV_SPA: c_uint = 4;
pub(super) const SCTP_RECVV_RCVINFO: c_uint = 1;
const SCTP_SEND_SNDINFO_VALID: u32 = 0x1;
const SCTP_SEND_PRINFO_VALID: u32 = 0x2;

/// `sctp_event.se_type` 取值。
pub(super) const SCTP_ASSOC_CHANGE: u16 = 0x0001;
pub(super) const SCTP_PEER_ADDR_CHANGE: u16 = 0x0002;
pub(super) const SCTP_REMOTE_ERROR: u16 = 0x0003;
pub(super) const SCTP_SEND_FAILED: u16 = 0x0004;
pub(super) const SCTP_SHUTDOWN_EVENT: u16 = 0x0005;
pub(super) const SCTP_ADAPTATION_INDICATION: u16 = 0x0006;
pub(super) const SCTP_PARTIAL_DELIVERY_EVENT: u16 = 0x0007;
pub(super) const SCTP_AUTHENTICATION_EVENT: u16 = 0x0008;
pub(super) const SCTP_STREAM_RESET_EVENT: u16 = 0x0009;
pub(super) const SCTP_SENDER_DRY_EVENT: u16 = 0x000a;
pub(super) const SCTP_SEND_FAILED_EVENT: u16 = 0x000e;

const SCTP_EOF: u16 = 0x0100;
const SCTP_ABORT: u16 = 0x0200;
pub(super) const SCTP_UNORDERED: u16 = 0x0400;
const SCTP_ADDR_OVER: u16 = 0x0800;
const SCTP_SENDALL: u16 = 0x1000;
const SCTP_SACK_IMMEDIATELY: u16 = 0x4000;

const SCTP_PR_SCTP_NONE: u16 = 0;
const SCTP_PR_SCTP_TTL: u16 = 1;
const SCTP_PR_SCTP_PRIO: u16 = 2;
const SCTP_PR_SCTP_RTX: u16 = 3;

/// `sctp_sendv_spa`：flags, sndinfo(16), prinfo(8), authinfo(2)，补齐到 4 字节。
pub(super) const SENDV_SPA_LEN: usize = 32;
/// `sctp_event`：assoc_id, type, on，补齐到 4 字节。
pub(super) const EVENT_LEN: usize = 8;
/// `sctp_sndinfo`。
pub(super) const SNDINFO_LEN: usize = 16;
const PADDRINFO_LEN: usize = SOCKADDR_STORAGE_LEN + 24;
pub(super) const STATUS_LEN: usize = 24 + PADDRINFO_LEN;
/// `sctp_paddrparams`：address 在前，其后 assoc_id、hbinterval、pathmtu、flags、
/// flowlabel、pathmaxrxt(u16)、dscp(u8)。
pub(super) const PADDRPARAMS_LEN: usize = SOCKADDR_STORAGE_LEN + 24;

const FLAG_MAP: [(SendFlags, u16); 6] = [
    (SendFlags::UNORDERED, SCTP_UNORDERED),
    (SendFlags::ADDR_OVER, SCTP_ADDR_OVER),
    (SendFlags::ABORT, SCTP_ABORT),
    (SendFlags::EOF, SCTP_EOF),
    (SendFlags::SENDALL, SCTP_SENDALL),
    (SendFlags::SACK_IMMEDIATELY, SCTP_SACK_IMMEDIATELY),
];

pub(super) fn native_send_flags(flags: SendFlags) -> u16 {
    FLAG_MAP
        .iter()
        .filter(|(logical, _)| flags.contains(*logical))
        .fold(0, |native, (_, bit)| native | bit)
}

fn logical_send_flags(native: u16) -> SendFlags {
    FLAG_MAP
        .iter()
        .filter(|(_, bit)| native & bit != 0)
        .fold(SendFlags::empty(), |flags, (logical, _)| flags | *logical)
}

fn pr_policy(policy: PrPolicy) -> u16 {
    match policy {
        PrPolicy::Reliable => SCTP_PR_SCTP_NONE,
        PrPolicy::Ttl => SCTP_PR_SCTP_TTL,
        PrPolicy::Priority => SCTP_PR_SCTP_PRIO,
        PrPolicy::Retransmissions => SCTP_PR_SCTP_RTX,
    }
}

/// 构造 `sctp_sendv_spa`；存在部分可靠策略时附带 `sctp_prinfo`。
pub(super) fn encode_sendv_spa(params: &SendParams) -> Vec<u8> {
    let policy = params.flags.effective_policy(params.ttl_ms);
    let mut valid = SCTP_SEND_SNDINFO_VALID;
    if policy != PrPolicy::Reliable {
        valid |= SCTP_SEND_PRINFO_VALID;
    }
    StructWriter::new()
        .u32(valid)
        .u16(params.stream)
        .u16(native_send_flags(params.flags))
        .u32(params.ppid)
        .u32(params.context)
        .u32(params.association_id as u32)
        .u16(pr_policy(policy))
        .pad(2)
        .u32(params.ttl_ms)
        .u16(0)
        .pad(2)
        .finish()
}

pub(super) fn encode_sndinfo(info: &SendInfo) -> Vec<u8> {
    StructWriter::new()
        .u16(info.stream)
        .u16(native_send_flags(info.flags))
        .u32(info.ppid)
        .u32(info.context)
        .u32(info.association_id as u32)
        .finish()
}

pub(super) fn sndinfo_query(association_id: i32) -> Vec<u8> {
    StructWriter::new()
        .pad(12)
        .i32(association_id)
        .finish()
}

pub(super) fn decode_sndinfo(bytes: &[u8]) -> SendInfo {
    let r = StructReader::new(bytes);
    SendInfo {
        stream: r.u16(0),
        flags: logical_send_flags(r.u16(2)),
        ppid: r.u32(4),
        context: r.u32(8),
        ttl_ms: 0,
        association_id: r.i32(12),
    }
}

pub(super) fn encode_event(association_id: u32, event_type: u16, on: bool) -> Vec<u8> {
    StructWriter::new()
        .u32(association_id)
        .u16(event_type)
        .u8(u8::from(on))
        .pad(1)
        .finish()
}

pub(super) fn decode_event_on(bytes: &[u8]) -> bool {
    StructReader::new(bytes).u8(6) != 0
}

/// `sctp_udpencaps`：sockaddr_storage + assoc_id + 端口，按 8 字节对齐。
pub(super) const UDPENCAPS_LEN: usize = SOCKADDR_STORAGE_LEN + 8;

/// 端点级远端封装端口；端口按网络字节序写入。
pub(super) fn encode_udpencaps(port: u16) -> Vec<u8> {
    StructWriter::new()
        .sockaddr_storage(None)
        .u32(SCTP_FUTURE_ASSOC)
        .raw(&port.to_be_bytes())
        .pad(2)
        .finish()
}

/// usrsctp 的 `sctp_assocparams` 把三个 32 位字段放在两个 16 位字段之前。
pub(super) const ASSOCPARAMS_LEN: usize = 20;

pub(super) fn encode_assocparams(params: &AssocParams) -> Vec<u8> {
    StructWriter::new()
        .i32(params.association_id)
        .u32(params.peer_receive_window)
        .u32(params.local_receive_window)
        .u32(params.cookie_life)
        .u16(params.max_retransmissions)
        .u16(params.peer_destinations)
        .finish()
}

pub(super) fn decode_assocparams(bytes: &[u8]) -> AssocParams {
    let r = StructReader::new(bytes);
    AssocParams {
        association_id: r.i32(0),
        peer_receive_window: r.u32(4),
        local_receive_window: r.u32(8),
        cookie_life: r.u32(12),
        max_retransmissions: r.u16(16),
        peer_destinations: r.u16(18),
    }
}

fn association_state(raw: i32) -> AssociationState {
    match raw {
        0x0000 => AssociationState::Closed,
        0x0002 => AssociationState::CookieWait,
        0x0004 => AssociationState::CookieEchoed,
        0x0008 => AssociationState::Established,
        0x0010 => AssociationState::ShutdownSent,
        0x0020 => AssociationState::ShutdownReceived,
        0x0040 => AssociationState::ShutdownAckSent,
        0x0080 => AssociationState::ShutdownPending,
        0x1000 => AssociationState::Bound,
        0x2000 => AssociationState::Listen,
        other => AssociationState::Unknown(other),
    }
}

fn path_state(raw: i32) -> PathState {
    match raw {
        0x0001 => PathState::Active,
        0x0002 => PathState::Inactive,
        0x0200 => PathState::Unconfirmed,
        other => PathState::Unknown(other),
    }
}

pub(super) fn status_query(association_id: i32) -> Vec<u8> {
    StructWriter::new()
        .i32(association_id)
        .pad(STATUS_LEN - 4)
        .finish()
}

pub(super) fn decode_status(bytes: &[u8]) -> Status {
    let r = StructReader::new(bytes);
    let primary = 24;
    let after_addr = primary + SOCKADDR_STORAGE_LEN;
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
            address: r.sockaddr(primary),
            association_id: r.i32(after_addr),
            state: path_state(r.i32(after_addr + 4)),
            cwnd: r.u32(after_addr + 8),
            srtt: r.u32(after_addr + 12),
            rto: r.u32(after_addr + 16),
            mtu: r.u32(after_addr + 20),
        },
    }
}

/// usrsctp 的路径参数不含 SACK 延迟，请求这些字段时返回参数错误。
pub(super) fn encode_paddrparams(params: &PeerAddressParams) -> Result<Vec<u8>> {
    let sack_flags = PeerAddressFlags::SACKDELAY_ENABLE | PeerAddressFlags::SACKDELAY_DISABLE;
    if params.sack_delay != 0 || params.flags.intersects(sack_flags) {
        return Err(SctpError::argument(
            "sack delay is not part of usrsctp peer address parameters",
        ));
    }
    Ok(StructWriter::new()
        .sockaddr_storage(params.address.as_ref())
        .i32(params.association_id)
        .u32(params.heartbeat_interval)
        .u32(params.path_mtu)
        .u32(params.flags.bits())
        .u32(0)
        .u16(params.path_max_retransmissions)
        .u8(0)
        .pad(1)
        .finish())
}

pub(super) fn decode_paddrparams(bytes: &[u8]) -> PeerAddressParams {
    let r = StructReader::new(bytes);
    let after_addr = SOCKADDR_STORAGE_LEN;
    PeerAddressParams {
        address: r.sockaddr(0).map(Into::into),
        association_id: r.i32(after_addr),
        heartbeat_interval: r.u32(after_addr + 4),
        path_mtu: r.u32(after_addr + 8),
        flags: PeerAddressFlags::from_bits_truncate(r.u32(after_addr + 12)),
        path_max_retransmissions: r.u16(after_addr + 20),
        sack_delay: 0,
    }
}
