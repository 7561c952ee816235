//! 原生结构体的字节级编解码。
//!
//! 选项与辅助数据的结构体在两个后端之间大多同构，少数（`sctp_status`、
//! `sctp_paddrparams`）字段顺序或打包方式不同。统一按"偏移 + 宿主字节序"显式读写，
//! 不依赖 `#[repr(packed)]`，布局差异在调用处一目了然。

use std::net::SocketAddr;

use crate::{
    address::{SOCKADDR_STORAGE_LEN, SctpAddress, decode_sockaddr, encode_sockaddr_storage},
    backend::RecvInfo,
    message::RecvInfoFlags,
    options::{AssocParams, AuthKey, AuthKeyId, InitParams, RtoInfo},
};

/// 顺序写入器，按需补齐对齐填充。
#[derive(Debug, Default)]
pub(crate) struct StructWriter {
    bytes: Vec<u8>,
}

impl StructWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn u8(mut self, value: u8) -> Self {
        self.bytes.push(value);
        self
    }

    pub(crate) fn u16(mut self, value: u16) -> Self {
        self.bytes.extend_from_slice(&value.to_ne_bytes());
        self
    }

    pub(crate) fn u32(mut self, value: u32) -> Self {
        self.bytes.extend_from_slice(&value.to_ne_bytes());
        self
    }

    pub(crate) fn i32(mut self, value: i32) -> Self {
        self.bytes.extend_from_slice(&value.to_ne_bytes());
        self
    }

    pub(crate) fn pad(mut self, len: usize) -> Self {
        self.bytes.resize(self.bytes.len() + len, 0);
        self
    }

    pub(crate) fn raw(mut self, value: &[u8]) -> Self {
        self.bytes.extend_from_slice(value);
        self
    }

    pub(crate) fn sockaddr_storage(self, addr: Option<&SocketAddr>) -> Self {
        self.raw(&encode_sockaddr_storage(addr))
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// 按偏移读取；越界读取返回 0，调用方负责先校验长度。
#[derive(Clone, Copy, Debug)]
pub(crate) struct StructReader<'a> {
    bytes: &'a [u8],
}

impl<'a> StructReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub(crate) fn u8(&self, offset: usize) -> u8 {
        self.bytes.get(offset).copied().unwrap_or(0)
    }

    pub(crate) fn u16(&self, offset: usize) -> u16 {
        self.bytes
            .get(offset..offset + 2)
            .map(|b| u16::from_ne_bytes([b[0], b[1]]))
            .unwrap_or(0)
    }

    pub(crate) fn u32(&self, offset: usize) -> u32 {
        self.bytes
            .get(offset..offset + 4)
            .map(|b| u32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .unwrap_or(0)
    }

    pub(crate) fn i32(&self, offset: usize) -> i32 {
        self.u32(offset) as i32
    }

    pub(crate) fn sockaddr(&self, offset: usize) -> Option<SctpAddress> {
        let end = (offset + SOCKADDR_STORAGE_LEN).min(self.bytes.len());
        let slice = self.bytes.get(offset..end)?;
        decode_sockaddr(slice).map(|(addr, _)| SctpAddress::from(addr))
    }
}

/// `sctp_rtoinfo`：assoc_id, initial, max, min。
pub(crate) const RTOINFO_LEN: usize = 16;

pub(crate) fn encode_rtoinfo(info: &RtoInfo) -> Vec<u8> {
    StructWriter::new()
        .i32(info.association_id)
        .u32(info.initial)
        .u32(info.max)
        .u32(info.min)
        .finish()
}

pub(crate) fn decode_rtoinfo(bytes: &[u8]) -> RtoInfo {
    let r = StructReader::new(bytes);
    RtoInfo {
        association_id: r.i32(0),
        initial: r.u32(4),
        max: r.u32(8),
        min: r.u32(12),
    }
}

/// `sctp_assocparams`。
pub(crate) const ASSOCPARAMS_LEN: usize = 20;

pub(crate) fn encode_assocparams(params: &AssocParams) -> Vec<u8> {
    StructWriter::new()
        .i32(params.association_id)
        .u16(params.max_retransmissions)
        .u16(params.peer_destinations)
        .u32(params.peer_receive_window)
        .u32(params.local_receive_window)
        .u32(params.cookie_life)
        .finish()
}

pub(crate) fn decode_assocparams(bytes: &[u8]) -> AssocParams {
    let r = StructReader::new(bytes);
    AssocParams {
        association_id: r.i32(0),
        max_retransmissions: r.u16(4),
        peer_destinations: r.u16(6),
        peer_receive_window: r.u32(8),
        local_receive_window: r.u32(12),
        cookie_life: r.u32(16),
    }
}

/// `sctp_initmsg`。
pub(crate) const INITMSG_LEN: usize = 8;

pub(crate) fn encode_initmsg(params: &InitParams) -> Vec<u8> {
    StructWriter::new()
        .u16(params.num_ostreams)
        .u16(params.max_instreams)
        .u16(params.max_attempts)
        .u16(params.max_init_timeout)
        .finish()
}

pub(crate) fn decode_initmsg(bytes: &[u8]) -> InitParams {
    let r = StructReader::new(bytes);
    InitParams {
        num_ostreams: r.u16(0),
        max_instreams: r.u16(2),
        max_attempts: r.u16(4),
        max_init_timeout: r.u16(6),
    }
}

/// `sctp_authkey`：assoc_id, keynumber, keylength, key[]。
pub(crate) fn encode_authkey(key: &AuthKey) -> Vec<u8> {
    StructWriter::new()
        .i32(key.association_id)
        .u16(key.key_number)
        .u16(key.key.len() as u16)
        .raw(&key.key)
        .finish()
}

/// `sctp_authkeyid`，尾部补齐到 8 字节。
pub(crate) const AUTHKEYID_LEN: usize = 8;

pub(crate) fn encode_authkeyid(id: &AuthKeyId) -> Vec<u8> {
    StructWriter::new()
        .i32(id.association_id)
        .u16(id.key_number)
        .pad(2)
        .finish()
}

pub(crate) fn decode_authkeyid(bytes: &[u8]) -> AuthKeyId {
    let r = StructReader::new(bytes);
    AuthKeyId {
        association_id: r.i32(0),
        key_number: r.u16(4),
    }
}

/// `sctp_assoc_value`。
pub(crate) const ASSOC_VALUE_LEN: usize = 8;

pub(crate) fn encode_assoc_value(association_id: i32, value: u32) -> Vec<u8> {
    StructWriter::new().i32(association_id).u32(value).finish()
}

pub(crate) fn decode_assoc_value(bytes: &[u8]) -> u32 {
    StructReader::new(bytes).u32(4)
}

pub(crate) fn encode_int(value: i32) -> Vec<u8> {
    value.to_ne_bytes().to_vec()
}

pub(crate) fn decode_int(bytes: &[u8]) -> i32 {
    StructReader::new(bytes).i32(0)
}

/// `sctp_rcvinfo`（两个后端布局一致）：sid, ssn, flags, pad, ppid, tsn, cumtsn, context, assoc_id。
pub(crate) const RCVINFO_LEN: usize = 28;

/// 解码 `sctp_rcvinfo`；`unordered_bit` 为该后端 `SCTP_UNORDERED` 的原生取值。
pub(crate) fn decode_rcvinfo(bytes: &[u8], unordered_bit: u16) -> RecvInfo {
    let r = StructReader::new(bytes);
    let mut flags = RecvInfoFlags::empty();
    if r.u16(4) & unordered_bit != 0 {
        flags |= RecvInfoFlags::UNORDERED;
    }
    RecvInfo {
        stream: r.u16(0),
        ssn: r.u16(2),
        flags,
        ppid: r.u32(8),
        tsn: r.u32(12),
        cumtsn: r.u32(16),
        context: r.u32(20),
        ttl: 0,
        association_id: r.i32(24),
    }
}
