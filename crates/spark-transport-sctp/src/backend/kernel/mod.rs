//! Linux 内核 SCTP 后端。
//!
//! # 模块定位（Why）
//! - 内核 SCTP 以普通文件描述符承载，套接字级能力（非阻塞、超时、linger、监听）直接复用
//!   `socket2`；SCTP 特有的 bindx / connectx / peeloff / getaddrs 则只能经由
//!   `SOL_SCTP` 层的 `setsockopt` / `getsockopt` 完成。
//!
//! # 实现要点（How）
//! - 多地址调用使用"紧凑 sockaddr 数组 + 字节长度"约定。
//! - 发送：第一个目的地址放入 `msg_name`，其余以 `SCTP_DSTADDRV4/V6` 辅助数据附加；
//!   发送参数总以 `SCTP_SNDRCV` 辅助数据携带。分散输入直接映射为 `iovec` 数组。
//! - 接收：同时识别 `SCTP_RCVINFO` 与 `SCTP_SNDRCV` 两种辅助数据，前者优先。
//! - `close` 通过 `into_raw_fd` 接管描述符再调用 `close(2)`，以便把 errno 透传给调用方。

mod sys;

use std::{
    io::{self, IoSlice},
    mem,
    net::{Shutdown, SocketAddr},
    os::fd::{AsRawFd, FromRawFd, IntoRawFd, RawFd},
    ptr,
};

use nix::{errno::Errno, libc};
use socket2::{Domain as SocketDomain, Protocol, Socket, Type};
use tracing::debug;

use self::sys::*;
use crate::{
    address::{
        AddressScope, BindMode, Domain, SOCKADDR_IN6_LEN, Style, encode_sockaddr, pack_sockaddrs,
        unpack_sockaddrs,
    },
    backend::{
        HandleId, RawReceive, RecvInfo, ResolvedOption, SctpBackend,
        layout::{self, StructReader},
    },
    capability::NativeOption,
    config::SctpConfig,
    error::{Operation, Result, SctpError},
    message::{ReceiveFlags, SendParams},
    notification::{KERNEL_DIALECT, NotificationDialect},
    options::{OptionQuery, OptionValue, SctpOption},
};

/// 控制消息缓冲大小，足以容纳 `sctp_sndrcvinfo` 与 `sctp_rcvinfo`。
const RECV_CONTROL_LEN: usize = 256;

/// getaddrs 缓冲区的扩容上限。
const MAX_GETADDRS_LEN: usize = 64 * 1024;

const NATIVE_OPTIONS: &[(SctpOption, NativeOption)] = &[
    (SctpOption::RtoInfo, NativeOption::new(SOL_SCTP, SCTP_RTOINFO)),
    (SctpOption::AssociationInfo, NativeOption::new(SOL_SCTP, SCTP_ASSOCINFO)),
    (SctpOption::InitMsg, NativeOption::new(SOL_SCTP, SCTP_INITMSG)),
    (SctpOption::NoDelay, NativeOption::new(SOL_SCTP, SCTP_NODELAY)),
    (SctpOption::AutoClose, NativeOption::new(SOL_SCTP, SCTP_AUTOCLOSE)),
    (
        SctpOption::DisableFragments,
        NativeOption::new(SOL_SCTP, SCTP_DISABLE_FRAGMENTS),
    ),
    (
        SctpOption::PeerAddressParams,
        NativeOption::new(SOL_SCTP, SCTP_PEER_ADDR_PARAMS),
    ),
    (
        SctpOption::DefaultSendParams,
        NativeOption::new(SOL_SCTP, SCTP_DEFAULT_SEND_PARAM),
    ),
    (SctpOption::Events, NativeOption::new(SOL_SCTP, SCTP_EVENTS)),
    (
        SctpOption::MappedV4,
        NativeOption::new(SOL_SCTP, SCTP_I_WANT_MAPPED_V4_ADDR),
    ),
    (SctpOption::MaxSegment, NativeOption::new(SOL_SCTP, SCTP_MAXSEG)),
    (SctpOption::Status, NativeOption::new(SOL_SCTP, SCTP_STATUS)),
    (SctpOption::AuthKey, NativeOption::new(SOL_SCTP, SCTP_AUTH_KEY)),
    (
        SctpOption::AuthActiveKey,
        NativeOption::new(SOL_SCTP, SCTP_AUTH_ACTIVE_KEY),
    ),
    (
        SctpOption::AuthDeleteKey,
        NativeOption::new(SOL_SCTP, SCTP_AUTH_DELETE_KEY),
    ),
    (
        SctpOption::AuthDeactivateKey,
        NativeOption::new(SOL_SCTP, SCTP_AUTH_DEACTIVATE_KEY),
    ),
    (
        SctpOption::AuthSupported,
        NativeOption::new(SOL_SCTP, SCTP_AUTH_SUPPORTED),
    ),
    (
        SctpOption::ReceiveRcvInfo,
        NativeOption::new(SOL_SCTP, SCTP_RECVRCVINFO),
    ),
    (
        SctpOption::ReceiveTimeout,
        NativeOption::new(libc::SOL_SOCKET, libc::SO_RCVTIMEO),
    ),
    (
        SctpOption::SendTimeout,
        NativeOption::new(libc::SOL_SOCKET, libc::SO_SNDTIMEO),
    ),
    (
        SctpOption::Linger,
        NativeOption::new(libc::SOL_SOCKET, libc::SO_LINGER),
    ),
];

/// 内核 SCTP 句柄。
#[derive(Debug)]
pub struct KernelSocket {
    socket: Socket,
}

impl KernelSocket {
    fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl AsRawFd for KernelSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd()
    }
}

/// Linux 内核 SCTP 后端，无进程级状态。
#[derive(Clone, Copy, Debug, Default)]
pub struct KernelBackend;

impl KernelBackend {
    pub fn new() -> Self {
        Self
    }
}

fn last_error(op: Operation) -> SctpError {
    SctpError::from_errno(op, Errno::last() as i32)
}

fn setsockopt_raw(fd: RawFd, level: i32, name: i32, value: &[u8], op: Operation) -> Result<i32> {
    let ret = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            value.as_ptr() as *const libc::c_void,
            value.len() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(last_error(op));
    }
    Ok(ret)
}

/// `getsockopt`，`buf` 同时作为输入（assoc_id 等）与输出；返回内核写回的长度。
fn getsockopt_raw(fd: RawFd, level: i32, name: i32, buf: &mut [u8], op: Operation) -> Result<usize> {
    let mut len = buf.len() as libc::socklen_t;
    let ret = unsafe {
        libc::getsockopt(
            fd,
            level,
            name,
            buf.as_mut_ptr() as *mut libc::c_void,
            &mut len,
        )
    };
    if ret < 0 {
        return Err(last_error(op));
    }
    Ok(len as usize)
}

fn get_with(fd: RawFd, native: NativeOption, mut input: Vec<u8>) -> Result<Vec<u8>> {
    let len = getsockopt_raw(fd, native.level, native.name, &mut input, Operation::GET_OPTION)?;
    input.truncate(len);
    Ok(input)
}

fn set_with(fd: RawFd, native: NativeOption, value: &[u8]) -> Result<()> {
    setsockopt_raw(fd, native.level, native.name, value, Operation::SET_OPTION).map(|_| ())
}

fn set_io(op: Operation) -> impl FnOnce(io::Error) -> SctpError {
    move |err| SctpError::transport(op, err)
}

/// 8 字节对齐的辅助数据缓冲区。
fn control_buffer(len: usize) -> Vec<u64> {
    vec![0u64; len.div_ceil(mem::size_of::<u64>())]
}

/// 单条发送所需的辅助数据。
struct SendControl {
    entries: Vec<(libc::c_int, Vec<u8>)>,
}

impl SendControl {
    fn new(params: &SendParams) -> Self {
        let mut entries = vec![(SCTP_SNDRCV, encode_sndrcvinfo(params))];
        for extra in params.destinations.iter().skip(1) {
            match extra {
                SocketAddr::V4(v4) => entries.push((SCTP_DSTADDRV4, v4.ip().octets().to_vec())),
                SocketAddr::V6(v6) => entries.push((SCTP_DSTADDRV6, v6.ip().octets().to_vec())),
            }
        }
        Self { entries }
    }

    fn space(&self) -> usize {
        self.entries
            .iter()
            .map(|(_, data)| unsafe { libc::CMSG_SPACE(data.len() as u32) } as usize)
            .sum()
    }

    /// 把所有条目写入 `msg.msg_control`；调用前控制缓冲区已挂到 `msg` 上。
    fn write(&self, msg: &libc::msghdr) {
        let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(msg) };
        for (kind, data) in &self.entries {
            if cmsg.is_null() {
                break;
            }
            unsafe {
                (*cmsg).cmsg_level = IPPROTO_SCTP;
                (*cmsg).cmsg_type = *kind;
                (*cmsg).cmsg_len = libc::CMSG_LEN(data.len() as u32) as _;
                ptr::copy_nonoverlapping(data.as_ptr(), libc::CMSG_DATA(cmsg), data.len());
                cmsg = libc::CMSG_NXTHDR(msg, cmsg);
            }
        }
    }
}

/// 从接收到的控制消息中提取 SCTP 辅助信息，`SCTP_RCVINFO` 优先。
fn parse_recv_control(msg: &libc::msghdr) -> Option<RecvInfo> {
    let mut rcvinfo = None;
    let mut sndrcv = None;
    let mut cmsg = unsafe { libc::CMSG_FIRSTHDR(msg) };
    while !cmsg.is_null() {
        let (level, kind, len) = unsafe { ((*cmsg).cmsg_level, (*cmsg).cmsg_type, (*cmsg).cmsg_len) };
        let header = unsafe { libc::CMSG_LEN(0) } as usize;
        let data_len = (len as usize).saturating_sub(header);
        if level == IPPROTO_SCTP {
            let data = unsafe { std::slice::from_raw_parts(libc::CMSG_DATA(cmsg), data_len) };
            match kind {
                SCTP_RCVINFO if data_len >= layout::RCVINFO_LEN => {
                    rcvinfo = Some(layout::decode_rcvinfo(data, RCVINFO_UNORDERED));
                }
                SCTP_SNDRCV if data_len >= SNDRCVINFO_LEN => {
                    sndrcv = Some(decode_sndrcvinfo(data));
                }
                _ => {}
            }
        }
        cmsg = unsafe { libc::CMSG_NXTHDR(msg, cmsg) };
    }
    rcvinfo.or(sndrcv)
}

impl SctpBackend for KernelBackend {
    type Handle = KernelSocket;

    const NAME: &'static str = "kernel";
    const DIALECT: &'static NotificationDialect = &KERNEL_DIALECT;
    const CONCURRENT_IO: bool = true;

    fn native_options() -> &'static [(SctpOption, NativeOption)] {
        NATIVE_OPTIONS
    }

    fn initialize(_config: &SctpConfig) -> Result<Self> {
        Ok(Self)
    }

    fn handle_id(handle: &KernelSocket) -> HandleId {
        HandleId(handle.fd() as u64)
    }

    fn open(&self, domain: Domain, style: Style) -> Result<KernelSocket> {
        let socket = Socket::new(
            SocketDomain::from(domain.native()),
            Type::from(style.native()),
            Some(Protocol::from(IPPROTO_SCTP)),
        )
        .map_err(set_io(Operation::OPEN))?;
        let handle = KernelSocket { socket };
        // 旧内核没有 SCTP_RECVRCVINFO，此时退回 SCTP_SNDRCV 辅助数据。
        if let Err(err) = setsockopt_raw(
            handle.fd(),
            SOL_SCTP,
            SCTP_RECVRCVINFO,
            &layout::encode_int(1),
            Operation::OPEN,
        ) {
            debug!(backend = Self::NAME, errno = ?err.errno(), "SCTP_RECVRCVINFO unavailable");
        }
        Ok(handle)
    }

    fn close(&self, handle: KernelSocket) -> Result<()> {
        let fd = handle.socket.into_raw_fd();
        if unsafe { libc::close(fd) } < 0 {
            return Err(last_error(Operation::CLOSE));
        }
        Ok(())
    }

    fn bindx(&self, handle: &KernelSocket, addrs: &[SocketAddr], mode: BindMode) -> Result<()> {
        let name = match mode {
            BindMode::Add => SCTP_SOCKOPT_BINDX_ADD,
            BindMode::Remove => SCTP_SOCKOPT_BINDX_REM,
        };
        let packed = pack_sockaddrs(addrs);
        setsockopt_raw(handle.fd(), SOL_SCTP, name, &packed, Operation::BIND).map(|_| ())
    }

    fn local_port(&self, handle: &KernelSocket) -> Result<u16> {
        let local = handle.socket.local_addr().map_err(set_io(Operation::ADDRESSES))?;
        Ok(local.as_socket().map(|addr| addr.port()).unwrap_or(0))
    }

    fn connectx(&self, handle: &KernelSocket, addrs: &[SocketAddr]) -> Result<i32> {
        let packed = pack_sockaddrs(addrs);
        setsockopt_raw(
            handle.fd(),
            SOL_SCTP,
            SCTP_SOCKOPT_CONNECTX,
            &packed,
            Operation::CONNECT,
        )
    }

    fn listen(&self, handle: &KernelSocket, backlog: i32) -> Result<()> {
        handle.socket.listen(backlog).map_err(set_io(Operation::LISTEN))
    }

    fn shutdown(&self, handle: &KernelSocket, how: Shutdown) -> Result<()> {
        handle.socket.shutdown(how).map_err(set_io(Operation::SHUTDOWN))
    }

    fn set_nonblocking(&self, handle: &KernelSocket, nonblocking: bool) -> Result<()> {
        handle
            .socket
            .set_nonblocking(nonblocking)
            .map_err(set_io(Operation::CONFIGURE))
    }

    fn send_flat(&self, handle: &KernelSocket, payload: &[u8], params: &SendParams) -> Result<usize> {
        self.send_vectored(handle, &[IoSlice::new(payload)], params)
    }

    fn send_vectored(
        &self,
        handle: &KernelSocket,
        fragments: &[IoSlice<'_>],
        params: &SendParams,
    ) -> Result<usize> {
        let mut name = Vec::with_capacity(SOCKADDR_IN6_LEN);
        if let Some(first) = params.destinations.first() {
            encode_sockaddr(first, &mut name);
        }
        let control = SendControl::new(params);
        let mut control_buf = control_buffer(control.space());

        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        if !name.is_empty() {
            msg.msg_name = name.as_mut_ptr() as *mut libc::c_void;
            msg.msg_namelen = name.len() as libc::socklen_t;
        }
        // `IoSlice` 在 unix 上与 `iovec` ABI 兼容。
        msg.msg_iov = fragments.as_ptr() as *mut libc::iovec;
        msg.msg_iovlen = fragments.len() as _;
        msg.msg_control = control_buf.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = control.space() as _;
        control.write(&msg);

        let sent = unsafe { libc::sendmsg(handle.fd(), &msg, 0) };
        if sent < 0 {
            return Err(last_error(Operation::SEND));
        }
        Ok(sent as usize)
    }

    fn recv(&self, handle: &KernelSocket, buf: &mut [u8], flags: ReceiveFlags) -> Result<RawReceive> {
        let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
        let mut iov = libc::iovec {
            iov_base: buf.as_mut_ptr() as *mut libc::c_void,
            iov_len: buf.len(),
        };
        let mut control_buf = control_buffer(RECV_CONTROL_LEN);

        let mut msg: libc::msghdr = unsafe { mem::zeroed() };
        msg.msg_name = (&mut storage) as *mut _ as *mut libc::c_void;
        msg.msg_namelen = mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t;
        msg.msg_iov = &mut iov;
        msg.msg_iovlen = 1;
        msg.msg_control = control_buf.as_mut_ptr() as *mut libc::c_void;
        msg.msg_controllen = (control_buf.len() * mem::size_of::<u64>()) as _;

        let mut native_flags = 0;
        if flags.contains(ReceiveFlags::PEEK) {
            native_flags |= libc::MSG_PEEK;
        }
        if flags.contains(ReceiveFlags::DONT_WAIT) {
            native_flags |= libc::MSG_DONTWAIT;
        }

        let received = unsafe { libc::recvmsg(handle.fd(), &mut msg, native_flags) };
        if received < 0 {
            return Err(last_error(Operation::RECEIVE));
        }

        let sender = if msg.msg_namelen > 0 {
            let name = unsafe {
                std::slice::from_raw_parts(
                    (&storage) as *const _ as *const u8,
                    msg.msg_namelen as usize,
                )
            };
            crate::address::decode_sockaddr(name).map(|(addr, _)| addr)
        } else {
            None
        };

        Ok(RawReceive {
            len: received as usize,
            sender,
            info: parse_recv_control(&msg),
            notification: msg.msg_flags & MSG_NOTIFICATION != 0,
            end_of_record: msg.msg_flags & libc::MSG_EOR != 0,
        })
    }

    fn addresses(
        &self,
        handle: &KernelSocket,
        association_id: i32,
        scope: AddressScope,
    ) -> Result<Vec<SocketAddr>> {
        let name = match scope {
            AddressScope::Local => SCTP_GET_LOCAL_ADDRS,
            AddressScope::Peer => SCTP_GET_PEER_ADDRS,
        };
        let mut capacity = GETADDRS_HEADER_LEN + 16 * SOCKADDR_IN6_LEN;
        loop {
            let mut buf = vec![0u8; capacity];
            buf[..4].copy_from_slice(&association_id.to_ne_bytes());
            match getsockopt_raw(handle.fd(), SOL_SCTP, name, &mut buf, Operation::ADDRESSES) {
                Ok(len) => {
                    let count = StructReader::new(&buf).u32(4) as usize;
                    let end = len.clamp(GETADDRS_HEADER_LEN, buf.len());
                    return Ok(unpack_sockaddrs(&buf[GETADDRS_HEADER_LEN..end], count));
                }
                Err(err) if err.errno() == Some(libc::ENOMEM) && capacity < MAX_GETADDRS_LEN => {
                    capacity *= 2;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn peeloff(&self, handle: &KernelSocket, association_id: i32) -> Result<KernelSocket> {
        // 与 socket2 创建的句柄一致，剥离出的描述符也带 close-on-exec。
        let mut arg = encode_peeloff(association_id, true);
        let legacy = match getsockopt_raw(
            handle.fd(),
            SOL_SCTP,
            SCTP_SOCKOPT_PEELOFF_FLAGS,
            &mut arg,
            Operation::PEELOFF,
        ) {
            Ok(_) => false,
            // 4.13 之前的内核没有 PEELOFF_FLAGS。
            Err(err) if err.errno() == Some(libc::ENOPROTOOPT) => {
                arg = encode_peeloff(association_id, false);
                getsockopt_raw(
                    handle.fd(),
                    SOL_SCTP,
                    SCTP_SOCKOPT_PEELOFF,
                    &mut arg,
                    Operation::PEELOFF,
                )?;
                true
            }
            Err(err) => return Err(err),
        };
        let fd = StructReader::new(&arg).i32(4);
        let socket = unsafe { Socket::from_raw_fd(fd) };
        if legacy && unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
            return Err(last_error(Operation::PEELOFF));
        }
        debug!(backend = Self::NAME, association_id, fd, "association peeled off");
        Ok(KernelSocket { socket })
    }

    fn get_option(
        &self,
        handle: &KernelSocket,
        option: ResolvedOption,
        query: &OptionQuery,
    ) -> Result<OptionValue> {
        let fd = handle.fd();
        let native = option.native;
        let assoc = query.association_id;
        let value = match option.option {
            SctpOption::RtoInfo => {
                let input = layout::encode_rtoinfo(&crate::options::RtoInfo {
                    association_id: assoc,
                    ..Default::default()
                });
                OptionValue::Rto(layout::decode_rtoinfo(&get_with(fd, native, input)?))
            }
            SctpOption::AssociationInfo => {
                let input = layout::encode_assocparams(&crate::options::AssocParams {
                    association_id: assoc,
                    ..Default::default()
                });
                OptionValue::Association(layout::decode_assocparams(&get_with(fd, native, input)?))
            }
            SctpOption::InitMsg => {
                let bytes = get_with(fd, native, vec![0; layout::INITMSG_LEN])?;
                OptionValue::Init(layout::decode_initmsg(&bytes))
            }
            SctpOption::NoDelay
            | SctpOption::DisableFragments
            | SctpOption::MappedV4
            | SctpOption::ReceiveRcvInfo => {
                let bytes = get_with(fd, native, layout::encode_int(0))?;
                OptionValue::Flag(layout::decode_int(&bytes) != 0)
            }
            SctpOption::AutoClose => {
                let bytes = get_with(fd, native, layout::encode_int(0))?;
                OptionValue::Seconds(layout::decode_int(&bytes).max(0) as u32)
            }
            SctpOption::MaxSegment => {
                let bytes = get_with(fd, native, layout::encode_assoc_value(assoc, 0))?;
                OptionValue::Value(layout::decode_assoc_value(&bytes))
            }
            SctpOption::AuthSupported => {
                let bytes = get_with(fd, native, layout::encode_assoc_value(assoc, 0))?;
                OptionValue::Flag(layout::decode_assoc_value(&bytes) != 0)
            }
            SctpOption::PeerAddressParams => {
                let input = encode_paddrparams(&crate::options::PeerAddressParams {
                    association_id: assoc,
                    address: query.address,
                    ..Default::default()
                });
                OptionValue::PeerAddress(decode_paddrparams(&get_with(fd, native, input)?))
            }
            SctpOption::DefaultSendParams => {
                let bytes = get_with(fd, native, default_send_query(assoc))?;
                OptionValue::SendInfo(decode_default_send(&bytes))
            }
            SctpOption::Events => {
                let layout = option.subscription;
                let bytes = get_with(fd, native, vec![0; layout.struct_len()])?;
                OptionValue::Events(decode_event_subscribe(&bytes, layout))
            }
            SctpOption::Status => {
                let bytes = get_with(fd, native, status_query(assoc))?;
                OptionValue::Status(decode_status(&bytes))
            }
            SctpOption::AuthActiveKey => {
                let input = layout::encode_authkeyid(&crate::options::AuthKeyId {
                    association_id: assoc,
                    key_number: 0,
                });
                OptionValue::KeyId(layout::decode_authkeyid(&get_with(fd, native, input)?))
            }
            SctpOption::ReceiveTimeout => OptionValue::Timeout(
                handle
                    .socket
                    .read_timeout()
                    .map_err(set_io(Operation::GET_OPTION))?,
            ),
            SctpOption::SendTimeout => OptionValue::Timeout(
                handle
                    .socket
                    .write_timeout()
                    .map_err(set_io(Operation::GET_OPTION))?,
            ),
            SctpOption::Linger => OptionValue::Linger(
                handle.socket.linger().map_err(set_io(Operation::GET_OPTION))?,
            ),
            SctpOption::AuthKey | SctpOption::AuthDeleteKey | SctpOption::AuthDeactivateKey => {
                return Err(SctpError::argument(format!(
                    "option {:?} is write-only",
                    option.option
                )));
            }
        };
        Ok(value)
    }

    fn set_option(
        &self,
        handle: &KernelSocket,
        option: ResolvedOption,
        value: &OptionValue,
    ) -> Result<()> {
        let fd = handle.fd();
        let native = option.native;
        match (option.option, value) {
            (SctpOption::RtoInfo, OptionValue::Rto(info)) => {
                set_with(fd, native, &layout::encode_rtoinfo(info))
            }
            (SctpOption::AssociationInfo, OptionValue::Association(params)) => {
                set_with(fd, native, &layout::encode_assocparams(params))
            }
            (SctpOption::InitMsg, OptionValue::Init(params)) => {
                set_with(fd, native, &layout::encode_initmsg(params))
            }
            (
                SctpOption::NoDelay
                | SctpOption::DisableFragments
                | SctpOption::MappedV4
                | SctpOption::ReceiveRcvInfo,
                OptionValue::Flag(on),
            ) => set_with(fd, native, &layout::encode_int(i32::from(*on))),
            (SctpOption::AutoClose, OptionValue::Seconds(seconds)) => {
                let seconds = i32::try_from(*seconds)
                    .map_err(|_| SctpError::argument("autoclose seconds out of range"))?;
                set_with(fd, native, &layout::encode_int(seconds))
            }
            (SctpOption::MaxSegment, OptionValue::Value(size)) => {
                set_with(fd, native, &layout::encode_assoc_value(0, *size))
            }
            (SctpOption::AuthSupported, OptionValue::Flag(on)) => {
                set_with(fd, native, &layout::encode_assoc_value(0, u32::from(*on)))
            }
            (SctpOption::PeerAddressParams, OptionValue::PeerAddress(params)) => {
                set_with(fd, native, &encode_paddrparams(params))
            }
            (SctpOption::DefaultSendParams, OptionValue::SendInfo(info)) => {
                set_with(fd, native, &encode_default_send(info))
            }
            (SctpOption::Events, OptionValue::Events(mask)) => {
                set_with(fd, native, &encode_event_subscribe(*mask, option.subscription)?)
            }
            (SctpOption::AuthKey, OptionValue::AuthKey(key)) => {
                set_with(fd, native, &layout::encode_authkey(key))
            }
            (
                SctpOption::AuthActiveKey | SctpOption::AuthDeleteKey | SctpOption::AuthDeactivateKey,
                OptionValue::KeyId(id),
            ) => set_with(fd, native, &layout::encode_authkeyid(id)),
            (SctpOption::ReceiveTimeout, OptionValue::Timeout(timeout)) => handle
                .socket
                .set_read_timeout(*timeout)
                .map_err(set_io(Operation::SET_OPTION)),
            (SctpOption::SendTimeout, OptionValue::Timeout(timeout)) => handle
                .socket
                .set_write_timeout(*timeout)
                .map_err(set_io(Operation::SET_OPTION)),
            (SctpOption::Linger, OptionValue::Linger(linger)) => handle
                .socket
                .set_linger(*linger)
                .map_err(set_io(Operation::SET_OPTION)),
            (SctpOption::Status, _) => Err(SctpError::argument("option Status is read-only")),
            (other, value) => Err(OptionValue::mismatch(other, value)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 每个逻辑选项在内核后端都有原生坐标。
    #[test]
    fn every_option_has_a_native_entry() {
        for option in [
            SctpOption::RtoInfo,
            SctpOption::Events,
            SctpOption::Status,
            SctpOption::AuthSupported,
            SctpOption::Linger,
        ] {
            assert!(NATIVE_OPTIONS.iter().any(|(known, _)| *known == option));
        }
        assert_eq!(NATIVE_OPTIONS.len(), 21);
    }

    /// 多个目的地址：首个进入 `msg_name`，其余各占一条辅助数据。
    #[test]
    fn send_control_carries_extra_destinations() {
        let params = SendParams::default().with_destinations(vec![
            "127.0.0.1:9".parse().expect("v4"),
            "127.0.0.2:9".parse().expect("v4"),
            "[::1]:9".parse().expect("v6"),
        ]);
        let control = SendControl::new(&params);
        let kinds: Vec<_> = control.entries.iter().map(|(kind, _)| *kind).collect();
        assert_eq!(kinds, vec![SCTP_SNDRCV, SCTP_DSTADDRV4, SCTP_DSTADDRV6]);
        assert_eq!(control.entries[1].1, vec![127, 0, 0, 2]);
    }
}
