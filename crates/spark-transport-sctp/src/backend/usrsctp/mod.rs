//! 用户态 usrsctp 后端。
//!
//! # 模块定位（Why）
//! - usrsctp 把整个 SCTP 协议栈放在进程内，句柄是不透明的 `struct socket*`，只能通过
//!   `usrsctp_*` 函数操作；协议栈本身是进程级全局状态，必须显式初始化与回收。
//!
//! # 契约（What）
//! - 进程内同一时刻至多存在一个 [`UsrsctpBackend`]：重复初始化返回
//!   [`RuntimeError::AlreadyInitialized`]；最后一个引用释放时调用 `usrsctp_finish`。
//! - 多地址调用使用"紧凑 sockaddr 数组 + 地址个数"约定。
//! - 不支持原生分散发送，发送前由 trait 默认实现把片段拼接为连续缓冲区。
//! - 同一句柄不允许并发进入（`CONCURRENT_IO = false`），由端点串行化。
//!
//! # 实现要点（How）
//! - 事件订阅逐个调用 `SCTP_EVENT`；"数据辅助信息"在 usrsctp 中对应 `SCTP_RECVRCVINFO`。
//! - 端口读取没有 `getsockname`，改用 `usrsctp_getladdrs` 的第一条记录。

mod sys;

use std::{
    ffi::c_void,
    mem,
    net::{Shutdown, SocketAddr},
    ptr::{self, NonNull},
    sync::atomic::{AtomicBool, Ordering},
};

use nix::{errno::Errno, libc};
use tracing::{debug, warn};

use self::sys::*;
use crate::{
    address::{
        AddressScope, BindMode, Domain, Style, decode_sockaddr, pack_sockaddrs,
    },
    backend::{HandleId, RawReceive, ResolvedOption, SctpBackend, layout},
    capability::{NativeOption, SendFailureNaming, SubscriptionLayout},
    config::SctpConfig,
    error::{Operation, Result, RuntimeError, SctpError},
    message::{ReceiveFlags, SendParams},
    notification::{NotificationDialect, USRSCTP_DIALECT},
    options::{EventMask, OptionQuery, OptionValue, SctpOption},
};

/// 进程级协议栈是否已初始化。
static STACK_INITIALIZED: AtomicBool = AtomicBool::new(false);

const NATIVE_OPTIONS: &[(SctpOption, NativeOption)] = &[
    (SctpOption::RtoInfo, NativeOption::new(IPPROTO_SCTP, SCTP_RTOINFO)),
    (
        SctpOption::AssociationInfo,
        NativeOption::new(IPPROTO_SCTP, SCTP_ASSOCINFO),
    ),
    (SctpOption::InitMsg, NativeOption::new(IPPROTO_SCTP, SCTP_INITMSG)),
    (SctpOption::NoDelay, NativeOption::new(IPPROTO_SCTP, SCTP_NODELAY)),
    (
        SctpOption::AutoClose,
        NativeOption::new(IPPROTO_SCTP, SCTP_AUTOCLOSE),
    ),
    (
        SctpOption::DisableFragments,
        NativeOption::new(IPPROTO_SCTP, SCTP_DISABLE_FRAGMENTS),
    ),
    (
        SctpOption::PeerAddressParams,
        NativeOption::new(IPPROTO_SCTP, SCTP_PEER_ADDR_PARAMS),
    ),
    (
        SctpOption::DefaultSendParams,
        NativeOption::new(IPPROTO_SCTP, SCTP_DEFAULT_SNDINFO),
    ),
    (SctpOption::Events, NativeOption::new(IPPROTO_SCTP, SCTP_EVENT)),
    (
        SctpOption::MappedV4,
        NativeOption::new(IPPROTO_SCTP, SCTP_I_WANT_MAPPED_V4_ADDR),
    ),
    (SctpOption::MaxSegment, NativeOption::new(IPPROTO_SCTP, SCTP_MAXSEG)),
    (SctpOption::Status, NativeOption::new(IPPROTO_SCTP, SCTP_STATUS)),
    (SctpOption::AuthKey, NativeOption::new(IPPROTO_SCTP, SCTP_AUTH_KEY)),
    (
        SctpOption::AuthActiveKey,
        NativeOption::new(IPPROTO_SCTP, SCTP_AUTH_ACTIVE_KEY),
    ),
    (
        SctpOption::AuthDeleteKey,
        NativeOption::new(IPPROTO_SCTP, SCTP_AUTH_DELETE_KEY),
    ),
    (
        SctpOption::AuthDeactivateKey,
        NativeOption::new(IPPROTO_SCTP, SCTP_AUTH_DEACTIVATE_KEY),
    ),
    (
        SctpOption::AuthSupported,
        NativeOption::new(IPPROTO_SCTP, SCTP_AUTH_SUPPORTED),
    ),
    (
        SctpOption::ReceiveRcvInfo,
        NativeOption::new(IPPROTO_SCTP, SCTP_RECVRCVINFO),
    ),
    (
        SctpOption::Linger,
        NativeOption::new(libc::SOL_SOCKET, libc::SO_LINGER),
    ),
];

/// usrsctp 句柄。
#[derive(Debug)]
pub struct UsrsctpSocket {
    raw: NonNull<RawSocket>,
}

// usrsctp 的 socket 由协议栈内部锁保护；端点在 `CONCURRENT_IO = false` 时额外串行化访问。
unsafe impl Send for UsrsctpSocket {}
unsafe impl Sync for UsrsctpSocket {}

impl UsrsctpSocket {
    fn as_ptr(&self) -> *mut RawSocket {
        self.raw.as_ptr()
    }
}

/// usrsctp 后端；持有进程级协议栈的所有权。
#[derive(Debug)]
pub struct UsrsctpBackend {
    udp_port: u16,
    remote_udp_port: u16,
}

impl UsrsctpBackend {
    /// 初始化进程级协议栈；`udp_port` 为 UDP 封装端口，`0` 表示不封装。
    pub fn init(udp_port: u16) -> Result<Self> {
        Self::init_with_remote(udp_port, 0)
    }

    /// 同 [`init`](Self::init)，并让此后打开的套接字经 `remote_udp_port` 封装发往对端。
    pub fn init_with_remote(udp_port: u16, remote_udp_port: u16) -> Result<Self> {
        if STACK_INITIALIZED
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(RuntimeError::AlreadyInitialized { backend: "usrsctp" }.into());
        }
        unsafe { usrsctp_init(udp_port, None, None) };
        debug!(
            backend = "usrsctp",
            udp_port,
            remote_udp_port,
            "usrsctp stack initialized"
        );
        Ok(Self {
            udp_port,
            remote_udp_port,
        })
    }

    pub fn udp_port(&self) -> u16 {
        self.udp_port
    }

    pub fn remote_udp_port(&self) -> u16 {
        self.remote_udp_port
    }
}

impl Drop for UsrsctpBackend {
    fn drop(&mut self) {
        if unsafe { usrsctp_finish() } != 0 {
            warn!(
                backend = "usrsctp",
                errno = Errno::last() as i32,
                "usrsctp_finish failed, sockets are still open"
            );
            return;
        }
        STACK_INITIALIZED.store(false, Ordering::Release);
        debug!(backend = "usrsctp", "usrsctp stack finished");
    }
}

fn last_error(op: Operation) -> SctpError {
    SctpError::from_errno(op, Errno::last() as i32)
}

fn check(ret: libc::c_int, op: Operation) -> Result<libc::c_int> {
    if ret < 0 {
        return Err(last_error(op));
    }
    Ok(ret)
}

fn setsockopt_raw(handle: &UsrsctpSocket, native: NativeOption, value: &[u8]) -> Result<()> {
    let ret = unsafe {
        usrsctp_setsockopt(
            handle.as_ptr(),
            native.level,
            native.name,
            value.as_ptr() as *const c_void,
            value.len() as libc::socklen_t,
        )
    };
    check(ret, Operation::SET_OPTION).map(|_| ())
}

fn getsockopt_raw(handle: &UsrsctpSocket, native: NativeOption, mut input: Vec<u8>) -> Result<Vec<u8>> {
    let mut len = input.len() as libc::socklen_t;
    let ret = unsafe {
        usrsctp_getsockopt(
            handle.as_ptr(),
            native.level,
            native.name,
            input.as_mut_ptr() as *mut c_void,
            &mut len,
        )
    };
    check(ret, Operation::GET_OPTION)?;
    input.truncate(len as usize);
    Ok(input)
}

/// 逻辑事件 → `sctp_event.se_type`；`DATA_IO` 不在此列。
fn event_type(event: EventMask, layout: SubscriptionLayout) -> Option<u16> {
    let event_type = match event {
        e if e == EventMask::ASSOCIATION => SCTP_ASSOC_CHANGE,
        e if e == EventMask::ADDRESS => SCTP_PEER_ADDR_CHANGE,
        e if e == EventMask::SEND_FAILURE => match layout.send_failure {
            SendFailureNaming::Legacy => SCTP_SEND_FAILED,
            SendFailureNaming::Event => SCTP_SEND_FAILED_EVENT,
        },
        e if e == EventMask::PEER_ERROR => SCTP_REMOTE_ERROR,
        e if e == EventMask::SHUTDOWN => SCTP_SHUTDOWN_EVENT,
        e if e == EventMask::PARTIAL_DELIVERY => SCTP_PARTIAL_DELIVERY_EVENT,
        e if e == EventMask::ADAPTATION_LAYER => SCTP_ADAPTATION_INDICATION,
        e if e == EventMask::AUTHENTICATION => SCTP_AUTHENTICATION_EVENT,
        e if e == EventMask::SENDER_DRY && layout.sender_dry => SCTP_SENDER_DRY_EVENT,
        e if e == EventMask::STREAM_RESET && layout.stream_reset => SCTP_STREAM_RESET_EVENT,
        _ => return None,
    };
    Some(event_type)
}

/// 把订阅掩码展开为逐事件的开关。
///
/// 掩码替换当前订阅：本平台能表达的事件全部下发，掩码之外的一律关闭。
/// 掩码中含有本平台没有编号的事件时返回参数错误，不做任何修改。
fn event_switches(mask: EventMask, subscription: SubscriptionLayout) -> Result<Vec<(u16, bool)>> {
    if let Some(missing) = mask
        .difference(EventMask::DATA_IO)
        .iter()
        .find(|event| event_type(*event, subscription).is_none())
    {
        return Err(SctpError::argument(format!(
            "event {:?} is not available on this platform",
            missing.names()
        )));
    }
    Ok(EventMask::all()
        .difference(EventMask::DATA_IO)
        .iter()
        .filter_map(|event| {
            event_type(event, subscription).map(|event_type| (event_type, mask.contains(event)))
        })
        .collect())
}

/// 把 usrsctp 分配的地址数组拷出并交还给 usrsctp 释放。
fn collect_addresses(
    handle: &UsrsctpSocket,
    association_id: i32,
    scope: AddressScope,
) -> Result<Vec<SocketAddr>> {
    let mut raw: *mut libc::sockaddr = ptr::null_mut();
    let count = unsafe {
        match scope {
            AddressScope::Local => usrsctp_getladdrs(handle.as_ptr(), association_id as u32, &mut raw),
            AddressScope::Peer => usrsctp_getpaddrs(handle.as_ptr(), association_id as u32, &mut raw),
        }
    };
    let count = check(count, Operation::ADDRESSES)? as usize;
    if raw.is_null() || count == 0 {
        return Ok(Vec::new());
    }
    // 数组中每项按各自协议族的长度紧凑排列，逐项读取族字段确定步长。
    let mut addrs = Vec::with_capacity(count);
    let mut offset = 0usize;
    for _ in 0..count {
        let entry = unsafe { (raw as *const u8).add(offset) };
        let family = unsafe { (*(entry as *const libc::sockaddr)).sa_family };
        let len = match libc::c_int::from(family) {
            libc::AF_INET => mem::size_of::<libc::sockaddr_in>(),
            libc::AF_INET6 => mem::size_of::<libc::sockaddr_in6>(),
            _ => break,
        };
        let bytes = unsafe { std::slice::from_raw_parts(entry, len) };
        if let Some((addr, _)) = decode_sockaddr(bytes) {
            addrs.push(addr);
        }
        offset += len;
    }
    unsafe {
        match scope {
            AddressScope::Local => usrsctp_freeladdrs(raw),
            AddressScope::Peer => usrsctp_freepaddrs(raw),
        }
    }
    Ok(addrs)
}

impl SctpBackend for UsrsctpBackend {
    type Handle = UsrsctpSocket;

    const NAME: &'static str = "usrsctp";
    const DIALECT: &'static NotificationDialect = &USRSCTP_DIALECT;
    const CONCURRENT_IO: bool = false;

    fn native_options() -> &'static [(SctpOption, NativeOption)] {
        NATIVE_OPTIONS
    }

    fn initialize(config: &SctpConfig) -> Result<Self> {
        Self::init_with_remote(
            config.usrsctp.udp_encapsulation_port,
            config.usrsctp.remote_udp_encapsulation_port,
        )
    }

    fn handle_id(handle: &UsrsctpSocket) -> HandleId {
        HandleId(handle.as_ptr() as usize as u64)
    }

    fn open(&self, domain: Domain, style: Style) -> Result<UsrsctpSocket> {
        let raw = unsafe {
            usrsctp_socket(
                domain.native(),
                style.native(),
                IPPROTO_SCTP,
                None,
                None,
                0,
                ptr::null_mut(),
            )
        };
        let raw = NonNull::new(raw).ok_or_else(|| last_error(Operation::OPEN))?;
        let handle = UsrsctpSocket { raw };
        let rcvinfo = NativeOption::new(IPPROTO_SCTP, SCTP_RECVRCVINFO);
        let mut configured = setsockopt_raw(&handle, rcvinfo, &layout::encode_int(1));
        if configured.is_ok() && self.remote_udp_port != 0 {
            let encaps = NativeOption::new(IPPROTO_SCTP, SCTP_REMOTE_UDP_ENCAPS_PORT);
            configured = setsockopt_raw(&handle, encaps, &encode_udpencaps(self.remote_udp_port));
        }
        if let Err(err) = configured {
            unsafe { usrsctp_close(handle.as_ptr()) };
            return Err(err);
        }
        Ok(handle)
    }

    fn close(&self, handle: UsrsctpSocket) -> Result<()> {
        unsafe { usrsctp_close(handle.as_ptr()) };
        Ok(())
    }

    fn bindx(&self, handle: &UsrsctpSocket, addrs: &[SocketAddr], mode: BindMode) -> Result<()> {
        let mut packed = pack_sockaddrs(addrs);
        // 单个通配地址走 usrsctp_bind，bindx 不接受通配地址。
        if mode == BindMode::Add && addrs.len() == 1 && addrs[0].ip().is_unspecified() {
            let ret = unsafe {
                usrsctp_bind(
                    handle.as_ptr(),
                    packed.as_mut_ptr() as *mut libc::sockaddr,
                    packed.len() as libc::socklen_t,
                )
            };
            return check(ret, Operation::BIND).map(|_| ());
        }
        let flags = match mode {
            BindMode::Add => SCTP_BINDX_ADD_ADDR,
            BindMode::Remove => SCTP_BINDX_REM_ADDR,
        };
        let ret = unsafe {
            usrsctp_bindx(
                handle.as_ptr(),
                packed.as_mut_ptr() as *mut libc::sockaddr,
                addrs.len() as libc::c_int,
                flags,
            )
        };
        check(ret, Operation::BIND).map(|_| ())
    }

    fn local_port(&self, handle: &UsrsctpSocket) -> Result<u16> {
        let addrs = collect_addresses(handle, 0, AddressScope::Local)?;
        Ok(addrs.first().map(SocketAddr::port).unwrap_or(0))
    }

    fn connectx(&self, handle: &UsrsctpSocket, addrs: &[SocketAddr]) -> Result<i32> {
        let packed = pack_sockaddrs(addrs);
        let mut association_id: u32 = 0;
        let ret = unsafe {
            usrsctp_connectx(
                handle.as_ptr(),
                packed.as_ptr() as *const libc::sockaddr,
                addrs.len() as libc::c_int,
                &mut association_id,
            )
        };
        check(ret, Operation::CONNECT)?;
        Ok(association_id as i32)
    }

    fn listen(&self, handle: &UsrsctpSocket, backlog: i32) -> Result<()> {
        check(unsafe { usrsctp_listen(handle.as_ptr(), backlog) }, Operation::LISTEN).map(|_| ())
    }

    fn shutdown(&self, handle: &UsrsctpSocket, how: Shutdown) -> Result<()> {
        let how = match how {
            Shutdown::Read => libc::SHUT_RD,
            Shutdown::Write => libc::SHUT_WR,
            Shutdown::Both => libc::SHUT_RDWR,
        };
        check(unsafe { usrsctp_shutdown(handle.as_ptr(), how) }, Operation::SHUTDOWN).map(|_| ())
    }

    fn set_nonblocking(&self, handle: &UsrsctpSocket, nonblocking: bool) -> Result<()> {
        let ret = unsafe { usrsctp_set_non_blocking(handle.as_ptr(), libc::c_int::from(nonblocking)) };
        check(ret, Operation::CONFIGURE).map(|_| ())
    }

    fn send_flat(&self, handle: &UsrsctpSocket, payload: &[u8], params: &SendParams) -> Result<usize> {
        let mut destinations = pack_sockaddrs(&params.destinations);
        let to = if destinations.is_empty() {
            ptr::null_mut()
        } else {
            destinations.as_mut_ptr() as *mut libc::sockaddr
        };
        let mut spa = encode_sendv_spa(params);
        let sent = unsafe {
            usrsctp_sendv(
                handle.as_ptr(),
                payload.as_ptr() as *const c_void,
                payload.len(),
                to,
                params.destinations.len() as libc::c_int,
                spa.as_mut_ptr() as *mut c_void,
                SENDV_SPA_LEN as libc::socklen_t,
                SCTP_SENDV_SPA,
                0,
            )
        };
        if sent < 0 {
            return Err(last_error(Operation::SEND));
        }
        Ok(sent as usize)
    }

    fn recv(&self, handle: &UsrsctpSocket, buf: &mut [u8], flags: ReceiveFlags) -> Result<RawReceive> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut from_len = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        let mut info = vec![0u8; layout::RCVINFO_LEN];
        let mut info_len = info.len() as libc::socklen_t;
        let mut info_type: libc::c_uint = 0;
        let mut msg_flags: libc::c_int = 0;
        if flags.contains(ReceiveFlags::PEEK) {
            msg_flags |= libc::MSG_PEEK;
        }
        if flags.contains(ReceiveFlags::DONT_WAIT) {
            msg_flags |= libc::MSG_DONTWAIT;
        }

        let received = unsafe {
            usrsctp_recvv(
                handle.as_ptr(),
                buf.as_mut_ptr() as *mut c_void,
                buf.len(),
                (&mut storage) as *mut _ as *mut libc::sockaddr,
                &mut from_len,
                info.as_mut_ptr() as *mut c_void,
                &mut info_len,
                &mut info_type,
                &mut msg_flags,
            )
        };
        if received < 0 {
            return Err(last_error(Operation::RECEIVE));
        }

        let sender = if from_len > 0 {
            let name = unsafe {
                std::slice::from_raw_parts(
                    (&storage) as *const _ as *const u8,
                    (from_len as usize).min(mem::size_of::<libc::sockaddr_storage>()),
                )
            };
            decode_sockaddr(name).map(|(addr, _)| addr)
        } else {
            None
        };
        let info = (info_type == SCTP_RECVV_RCVINFO && info_len as usize >= layout::RCVINFO_LEN)
            .then(|| layout::decode_rcvinfo(&info, SCTP_UNORDERED));

        Ok(RawReceive {
            len: received as usize,
            sender,
            info,
            notification: msg_flags & MSG_NOTIFICATION != 0,
            end_of_record: msg_flags & libc::MSG_EOR != 0,
        })
    }

    fn addresses(
        &self,
        handle: &UsrsctpSocket,
        association_id: i32,
        scope: AddressScope,
    ) -> Result<Vec<SocketAddr>> {
        collect_addresses(handle, association_id, scope)
    }

    fn peeloff(&self, handle: &UsrsctpSocket, association_id: i32) -> Result<UsrsctpSocket> {
        let raw = unsafe { usrsctp_peeloff(handle.as_ptr(), association_id as u32) };
        let raw = NonNull::new(raw).ok_or_else(|| last_error(Operation::PEELOFF))?;
        debug!(backend = Self::NAME, association_id, "association peeled off");
        Ok(UsrsctpSocket { raw })
    }

    fn get_option(
        &self,
        handle: &UsrsctpSocket,
        option: ResolvedOption,
        query: &OptionQuery,
    ) -> Result<OptionValue> {
        let native = option.native;
        let assoc = query.association_id;
        let value = match option.option {
            SctpOption::RtoInfo => {
                let input = layout::encode_rtoinfo(&crate::options::RtoInfo {
                    association_id: assoc,
                    ..Default::default()
                });
                OptionValue::Rto(layout::decode_rtoinfo(&getsockopt_raw(handle, native, input)?))
            }
            SctpOption::AssociationInfo => {
                let input = encode_assocparams(&crate::options::AssocParams {
                    association_id: assoc,
                    ..Default::default()
                });
                OptionValue::Association(decode_assocparams(&getsockopt_raw(handle, native, input)?))
            }
            SctpOption::InitMsg => {
                let bytes = getsockopt_raw(handle, native, vec![0; layout::INITMSG_LEN])?;
                OptionValue::Init(layout::decode_initmsg(&bytes))
            }
            SctpOption::NoDelay
            | SctpOption::DisableFragments
            | SctpOption::MappedV4
            | SctpOption::ReceiveRcvInfo => {
                let bytes = getsockopt_raw(handle, native, layout::encode_int(0))?;
                OptionValue::Flag(layout::decode_int(&bytes) != 0)
            }
            SctpOption::AutoClose => {
                let bytes = getsockopt_raw(handle, native, layout::encode_int(0))?;
                OptionValue::Seconds(layout::decode_int(&bytes).max(0) as u32)
            }
            SctpOption::MaxSegment => {
                let bytes = getsockopt_raw(handle, native, layout::encode_assoc_value(assoc, 0))?;
                OptionValue::Value(layout::decode_assoc_value(&bytes))
            }
            SctpOption::AuthSupported => {
                let bytes = getsockopt_raw(handle, native, layout::encode_assoc_value(assoc, 0))?;
                OptionValue::Flag(layout::decode_assoc_value(&bytes) != 0)
            }
            SctpOption::PeerAddressParams => {
                let input = encode_paddrparams(&crate::options::PeerAddressParams {
                    association_id: assoc,
                    address: query.address,
                    ..Default::default()
                })?;
                OptionValue::PeerAddress(decode_paddrparams(&getsockopt_raw(handle, native, input)?))
            }
            SctpOption::DefaultSendParams => {
                let bytes = getsockopt_raw(handle, native, sndinfo_query(assoc))?;
                OptionValue::SendInfo(decode_sndinfo(&bytes))
            }
            SctpOption::Events => {
                let subscription = option.subscription;
                let mut mask = EventMask::empty();
                let rcvinfo = NativeOption::new(IPPROTO_SCTP, SCTP_RECVRCVINFO);
                if layout::decode_int(&getsockopt_raw(handle, rcvinfo, layout::encode_int(0))?) != 0 {
                    mask |= EventMask::DATA_IO;
                }
                for event in EventMask::all().iter() {
                    let Some(event_type) = event_type(event, subscription) else {
                        continue;
                    };
                    let input = encode_event(SCTP_FUTURE_ASSOC, event_type, false);
                    if decode_event_on(&getsockopt_raw(handle, native, input)?) {
                        mask |= event;
                    }
                }
                OptionValue::Events(mask)
            }
            SctpOption::Status => {
                let bytes = getsockopt_raw(handle, native, status_query(assoc))?;
                OptionValue::Status(decode_status(&bytes))
            }
            SctpOption::AuthActiveKey => {
                let input = layout::encode_authkeyid(&crate::options::AuthKeyId {
                    association_id: assoc,
                    key_number: 0,
                });
                OptionValue::KeyId(layout::decode_authkeyid(&getsockopt_raw(handle, native, input)?))
            }
            SctpOption::Linger => {
                let bytes = getsockopt_raw(handle, native, vec![0; mem::size_of::<libc::linger>()])?;
                let r = layout::StructReader::new(&bytes);
                OptionValue::Linger(
                    (r.i32(0) != 0).then(|| std::time::Duration::from_secs(r.i32(4).max(0) as u64)),
                )
            }
            SctpOption::AuthKey
            | SctpOption::AuthDeleteKey
            | SctpOption::AuthDeactivateKey
            | SctpOption::ReceiveTimeout
            | SctpOption::SendTimeout => {
                return Err(SctpError::Unsupported {
                    option: option.option,
                    backend: Self::NAME,
                });
            }
        };
        Ok(value)
    }

    fn set_option(
        &self,
        handle: &UsrsctpSocket,
        option: ResolvedOption,
        value: &OptionValue,
    ) -> Result<()> {
        let native = option.native;
        match (option.option, value) {
            (SctpOption::RtoInfo, OptionValue::Rto(info)) => {
                setsockopt_raw(handle, native, &layout::encode_rtoinfo(info))
            }
            (SctpOption::AssociationInfo, OptionValue::Association(params)) => {
                setsockopt_raw(handle, native, &encode_assocparams(params))
            }
            (SctpOption::InitMsg, OptionValue::Init(params)) => {
                setsockopt_raw(handle, native, &layout::encode_initmsg(params))
            }
            (
                SctpOption::NoDelay
                | SctpOption::DisableFragments
                | SctpOption::MappedV4
                | SctpOption::ReceiveRcvInfo,
                OptionValue::Flag(on),
            ) => setsockopt_raw(handle, native, &layout::encode_int(i32::from(*on))),
            (SctpOption::AutoClose, OptionValue::Seconds(seconds)) => {
                let seconds = i32::try_from(*seconds)
                    .map_err(|_| SctpError::argument("autoclose seconds out of range"))?;
                setsockopt_raw(handle, native, &layout::encode_int(seconds))
            }
            (SctpOption::MaxSegment, OptionValue::Value(size)) => {
                setsockopt_raw(handle, native, &layout::encode_assoc_value(0, *size))
            }
            (SctpOption::AuthSupported, OptionValue::Flag(on)) => setsockopt_raw(
                handle,
                native,
                &layout::encode_assoc_value(0, u32::from(*on)),
            ),
            (SctpOption::PeerAddressParams, OptionValue::PeerAddress(params)) => {
                setsockopt_raw(handle, native, &encode_paddrparams(params)?)
            }
            (SctpOption::DefaultSendParams, OptionValue::SendInfo(info)) => {
                setsockopt_raw(handle, native, &encode_sndinfo(info))
            }
            (SctpOption::Events, OptionValue::Events(mask)) => {
                let subscription = option.subscription;
                let rcvinfo = NativeOption::new(IPPROTO_SCTP, SCTP_RECVRCVINFO);
                let data_io = mask.contains(EventMask::DATA_IO);
                let switches = event_switches(*mask, subscription)?;
                setsockopt_raw(handle, rcvinfo, &layout::encode_int(i32::from(data_io)))?;
                for (event_type, on) in switches {
                    setsockopt_raw(handle, native, &encode_event(SCTP_ALL_ASSOC, event_type, on))?;
                }
                Ok(())
            }
            (SctpOption::AuthKey, OptionValue::AuthKey(key)) => {
                setsockopt_raw(handle, native, &layout::encode_authkey(key))
            }
            (
                SctpOption::AuthActiveKey | SctpOption::AuthDeleteKey | SctpOption::AuthDeactivateKey,
                OptionValue::KeyId(id),
            ) => setsockopt_raw(handle, native, &layout::encode_authkeyid(id)),
            (SctpOption::Linger, OptionValue::Linger(linger)) => {
                let linger = libc::linger {
                    l_onoff: libc::c_int::from(linger.is_some()),
                    l_linger: linger.map(|d| d.as_secs() as libc::c_int).unwrap_or(0),
                };
                let bytes = unsafe {
                    std::slice::from_raw_parts(
                        (&linger) as *const libc::linger as *const u8,
                        mem::size_of::<libc::linger>(),
                    )
                };
                setsockopt_raw(handle, native, bytes)
            }
            (SctpOption::Status, _) => Err(SctpError::argument("option Status is read-only")),
            (other, value) => Err(OptionValue::mismatch(other, value)),
        }
    }
}
