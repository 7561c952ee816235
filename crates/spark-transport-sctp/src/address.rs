//! 地址、协议族与套接字风格。
//!
//! # 模块定位（Why）
//! - SCTP 的多宿主语义要求 bind/connect 一次携带多个地址，而内核与 usrsctp 都以"紧凑
//!   排列的原生 sockaddr 数组"作为入参；本模块负责在 `std::net` 类型与该原生布局之间互转。
//! - 原生布局随宿主平台变化（BSD 系带 `sin_len` 字段），因此编解码统一依赖 `libc`
//!   结构体而不是手写偏移。
//!
//! # 暴露接口（What）
//! - [`Domain`] / [`Style`]：打开端点时选择的协议族与一对多 / 一对一风格。
//! - [`SctpAddress`]：对外呈现的地址记录（协议族、IP 文本、端口）。
//! - [`BindMode`] / [`AddressScope`]：bindx 的增删模式与地址枚举范围。
//!
//! # 设计要点（How）
//! - `pack_sockaddrs` 输出紧凑数组及其字节长度；地址个数由调用方自行取 `len()`，
//!   后端据此选择"字节长度"（内核）或"地址个数"（usrsctp）两种约定。
//! - 解码时先把字节复制进对齐的 `sockaddr_storage`，避免对未对齐指针解引用。

use std::{
    fmt, mem,
    net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6},
    ptr,
};

use nix::libc;

use crate::error::{Result, SctpError};

/// 单次 bind/connect 默认允许的最大地址个数。
pub const DEFAULT_MAX_ADDRESSES: usize = 8;

/// 端点协议族。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Domain {
    Ipv4,
    Ipv6,
}

impl Domain {
    pub(crate) fn native(self) -> libc::c_int {
        match self {
            Domain::Ipv4 => libc::AF_INET,
            Domain::Ipv6 => libc::AF_INET6,
        }
    }

    /// 该协议族的通配地址。
    pub fn unspecified(self) -> IpAddr {
        match self {
            Domain::Ipv4 => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            Domain::Ipv6 => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        }
    }
}

impl From<IpAddr> for Domain {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => Domain::Ipv4,
            IpAddr::V6(_) => Domain::Ipv6,
        }
    }
}

/// 套接字风格。
///
/// - `OneToMany`：`SOCK_SEQPACKET`，一个句柄承载多条关联，默认风格。
/// - `OneToOne`：`SOCK_STREAM`，一个句柄对应一条关联（peeloff 的产物也属于此类）。
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Style {
    #[default]
    OneToMany,
    OneToOne,
}

impl Style {
    pub(crate) fn native(self) -> libc::c_int {
        match self {
            Style::OneToMany => libc::SOCK_SEQPACKET,
            Style::OneToOne => libc::SOCK_STREAM,
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Style::OneToMany => f.write_str("one-to-many"),
            Style::OneToOne => f.write_str("one-to-one"),
        }
    }
}

/// bindx 的增删模式。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum BindMode {
    #[default]
    Add,
    Remove,
}

/// 地址枚举范围：本端或对端。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum AddressScope {
    Local,
    Peer,
}

/// 对外呈现的 SCTP 地址。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct SctpAddress {
    ip: IpAddr,
    port: u16,
}

impl SctpAddress {
    pub fn new(ip: IpAddr, port: u16) -> Self {
        Self { ip, port }
    }

    /// 从 IP 文本与端口构造；文本非法时返回参数错误。
    pub fn parse(ip_text: &str, port: u16) -> Result<Self> {
        let ip = parse_ip(ip_text)?;
        Ok(Self { ip, port })
    }

    pub fn family(&self) -> Domain {
        Domain::from(self.ip)
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    pub fn ip_text(&self) -> String {
        self.ip.to_string()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }
}

impl From<SocketAddr> for SctpAddress {
    fn from(addr: SocketAddr) -> Self {
        Self {
            ip: addr.ip(),
            port: addr.port(),
        }
    }
}

impl From<SctpAddress> for SocketAddr {
    fn from(addr: SctpAddress) -> Self {
        addr.socket_addr()
    }
}

impl fmt::Display for SctpAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.socket_addr(), f)
    }
}

/// 解析 IP 文本。
pub fn parse_ip(text: &str) -> Result<IpAddr> {
    text.trim()
        .parse::<IpAddr>()
        .map_err(|_| SctpError::argument(format!("invalid IP address: {text:?}")))
}

/// 把 IP 列表与端口展开为 `SocketAddr` 列表，并执行个数与协议族校验。
///
/// 空列表展开为该协议族的通配地址。
pub(crate) fn expand_addresses(
    ips: &[IpAddr],
    port: u16,
    domain: Domain,
    max: usize,
) -> Result<Vec<SocketAddr>> {
    if ips.len() > max {
        return Err(SctpError::argument(format!(
            "too many addresses: {} (maximum {max})",
            ips.len()
        )));
    }
    if ips.is_empty() {
        return Ok(vec![SocketAddr::new(domain.unspecified(), port)]);
    }
    ips.iter()
        .map(|ip| {
            if domain == Domain::Ipv4 && ip.is_ipv6() {
                return Err(SctpError::argument(format!(
                    "IPv6 address {ip} cannot be used on an IPv4 endpoint"
                )));
            }
            Ok(SocketAddr::new(*ip, port))
        })
        .collect()
}

pub(crate) const SOCKADDR_IN_LEN: usize = mem::size_of::<libc::sockaddr_in>();
pub(crate) const SOCKADDR_IN6_LEN: usize = mem::size_of::<libc::sockaddr_in6>();
pub(crate) const SOCKADDR_STORAGE_LEN: usize = mem::size_of::<libc::sockaddr_storage>();

fn sockaddr_v4(addr: &SocketAddrV4) -> libc::sockaddr_in {
    // SAFETY: sockaddr_in 是纯数据结构，全零是合法取值。
    let mut sin: libc::sockaddr_in = unsafe { mem::zeroed() };
    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_port = addr.port().to_be();
    sin.sin_addr = libc::in_addr {
        s_addr: u32::from_ne_bytes(addr.ip().octets()),
    };
    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "dragonfly",
        target_os = "openbsd",
        target_os = "netbsd"
    ))]
    {
        sin.sin_len = SOCKADDR_IN_LEN as u8;
    }
    sin
}

fn sockaddr_v6(addr: &SocketAddrV6) -> libc::sockaddr_in6 {
    // SAFETY: 同上。
    let mut sin6: libc::sockaddr_in6 = unsafe { mem::zeroed() };
    sin6.sin6_family = libc::AF_INET6 as libc::sa_family_t;
    sin6.sin6_port = addr.port().to_be();
    sin6.sin6_flowinfo = addr.flowinfo();
    sin6.sin6_addr.s6_addr = addr.ip().octets();
    sin6.sin6_scope_id = addr.scope_id();
    #[cfg(any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "dragonfly",
        target_os = "openbsd",
        target_os = "netbsd"
    ))]
    {
        sin6.sin6_len = SOCKADDR_IN6_LEN as u8;
    }
    sin6
}

fn struct_bytes<T>(value: &T) -> &[u8] {
    // SAFETY: 仅把 POD 结构体视为只读字节序列，生命周期与 value 绑定。
    unsafe { std::slice::from_raw_parts(value as *const T as *const u8, mem::size_of::<T>()) }
}

/// 把单个地址按宿主原生布局追加到 `out`。
pub(crate) fn encode_sockaddr(addr: &SocketAddr, out: &mut Vec<u8>) {
    match addr {
        SocketAddr::V4(v4) => out.extend_from_slice(struct_bytes(&sockaddr_v4(v4))),
        SocketAddr::V6(v6) => out.extend_from_slice(struct_bytes(&sockaddr_v6(v6))),
    }
}

/// 把单个地址写入 `sockaddr_storage` 大小的缓冲区（用于嵌在选项结构体中的地址字段）。
pub(crate) fn encode_sockaddr_storage(addr: Option<&SocketAddr>) -> [u8; SOCKADDR_STORAGE_LEN] {
    let mut storage = [0u8; SOCKADDR_STORAGE_LEN];
    if let Some(addr) = addr {
        let mut bytes = Vec::with_capacity(SOCKADDR_IN6_LEN);
        encode_sockaddr(addr, &mut bytes);
        storage[..bytes.len()].copy_from_slice(&bytes);
    }
    storage
}

/// 紧凑排列多个地址，返回的缓冲长度即"字节长度"约定所需的值。
pub(crate) fn pack_sockaddrs(addrs: &[SocketAddr]) -> Vec<u8> {
    let mut out = Vec::with_capacity(addrs.len() * SOCKADDR_IN6_LEN);
    for addr in addrs {
        encode_sockaddr(addr, &mut out);
    }
    out
}

/// 从原生布局解码一个地址，返回地址及其在紧凑数组中占用的字节数。
///
/// 协议族不是 IPv4/IPv6 或字节不足时返回 `None`。
pub(crate) fn decode_sockaddr(bytes: &[u8]) -> Option<(SocketAddr, usize)> {
    // SAFETY: sockaddr_storage 全零合法；复制长度不超过其大小。
    let mut storage: libc::sockaddr_storage = unsafe { mem::zeroed() };
    let copied = bytes.len().min(SOCKADDR_STORAGE_LEN);
    unsafe {
        ptr::copy_nonoverlapping(
            bytes.as_ptr(),
            &mut storage as *mut libc::sockaddr_storage as *mut u8,
            copied,
        );
    }
    match storage.ss_family as libc::c_int {
        libc::AF_INET if copied >= SOCKADDR_IN_LEN => {
            // SAFETY: storage 对齐且至少包含 sockaddr_in 大小的有效字节。
            let sin = unsafe { &*(&storage as *const _ as *const libc::sockaddr_in) };
            let ip = Ipv4Addr::from(sin.sin_addr.s_addr.to_ne_bytes());
            let port = u16::from_be(sin.sin_port);
            Some((SocketAddr::V4(SocketAddrV4::new(ip, port)), SOCKADDR_IN_LEN))
        }
        libc::AF_INET6 if copied >= SOCKADDR_IN6_LEN => {
            // SAFETY: 同上，针对 sockaddr_in6。
            let sin6 = unsafe { &*(&storage as *const _ as *const libc::sockaddr_in6) };
            let addr = SocketAddrV6::new(
                Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                u16::from_be(sin6.sin6_port),
                sin6.sin6_flowinfo,
                sin6.sin6_scope_id,
            );
            Some((SocketAddr::V6(addr), SOCKADDR_IN6_LEN))
        }
        _ => None,
    }
}

/// 解码紧凑数组中最多 `count` 个地址；遇到无法识别的协议族即停止。
pub(crate) fn unpack_sockaddrs(mut bytes: &[u8], count: usize) -> Vec<SocketAddr> {
    let mut out = Vec::with_capacity(count.min(DEFAULT_MAX_ADDRESSES * 4));
    while out.len() < count {
        let Some((addr, used)) = decode_sockaddr(bytes) else {
            break;
        };
        out.push(addr);
        bytes = &bytes[used..];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 空列表展开为通配地址并保留端口。
    #[test]
    fn empty_list_expands_to_wildcard() {
        let addrs = expand_addresses(&[], 5000, Domain::Ipv6, DEFAULT_MAX_ADDRESSES)
            .expect("wildcard");
        assert_eq!(addrs, vec!["[::]:5000".parse().expect("addr")]);
    }

    /// 超过上限的地址列表在进入后端之前即被拒绝。
    #[test]
    fn too_many_addresses_is_argument_error() {
        let ips: Vec<IpAddr> = (1..=9).map(|i| IpAddr::V4(Ipv4Addr::new(10, 0, 0, i))).collect();
        let err = expand_addresses(&ips, 1, Domain::Ipv4, DEFAULT_MAX_ADDRESSES)
            .expect_err("nine addresses");
        assert!(err.is_argument());
    }

    #[test]
    fn ipv6_on_ipv4_endpoint_is_rejected() {
        let err = expand_addresses(&["::1".parse().expect("ip")], 1, Domain::Ipv4, 8)
            .expect_err("family mismatch");
        assert!(err.is_argument());
    }

    /// 紧凑数组可以混排 IPv4 与 IPv6，解码顺序与编码一致。
    #[test]
    fn packed_array_preserves_order_and_family() {
        let addrs: Vec<SocketAddr> = vec![
            "127.0.0.1:4000".parse().expect("v4"),
            "[::1]:4001".parse().expect("v6"),
            "127.0.0.2:4002".parse().expect("v4"),
        ];
        let packed = pack_sockaddrs(&addrs);
        assert_eq!(packed.len(), 2 * SOCKADDR_IN_LEN + SOCKADDR_IN6_LEN);
        assert_eq!(unpack_sockaddrs(&packed, addrs.len()), addrs);
    }

    #[test]
    fn decode_rejects_short_or_foreign_family() {
        assert!(decode_sockaddr(&[0u8; 4]).is_none());
        assert!(decode_sockaddr(&[0u8; SOCKADDR_STORAGE_LEN]).is_none());
    }

    #[test]
    fn address_text_parsing() {
        let addr = SctpAddress::parse(" 10.1.2.3 ", 42).expect("parse");
        assert_eq!(addr.family(), Domain::Ipv4);
        assert_eq!(addr.ip_text(), "10.1.2.3");
        assert_eq!(addr.to_string(), "10.1.2.3:42");
        assert!(SctpAddress::parse("not-an-ip", 1).expect_err("bad").is_argument());
    }
}
