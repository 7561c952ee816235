//! 单元测试用的记录型后端。
//!
//! 记录每一次后端调用，接收结果由测试预先编排，未读完的消息尾部留在队列头部；不支持原生分散发送，
//! 因此 `send_vectored` 走 trait 默认实现，测试可以直接观察拼接后的缓冲区。

use std::{
    collections::{HashMap, VecDeque},
    net::{Shutdown, SocketAddr},
    sync::atomic::{AtomicI32, AtomicU64, Ordering},
};

use parking_lot::Mutex;

use crate::{
    address::{AddressScope, BindMode, Domain, Style},
    backend::{HandleId, RawReceive, RecvInfo, ResolvedOption, SctpBackend},
    capability::NativeOption,
    config::SctpConfig,
    error::{Operation, Result, SctpError},
    message::{ReceiveFlags, SendParams},
    notification::{KERNEL_DIALECT, NotificationDialect},
    options::{OptionQuery, OptionValue, SctpOption},
};

/// 自动分配端口的起点。
pub(crate) const EPHEMERAL_PORT_BASE: u16 = 40000;

const NATIVE_OPTIONS: &[(SctpOption, NativeOption)] = &[
    (SctpOption::RtoInfo, NativeOption::new(132, 0)),
    (SctpOption::AssociationInfo, NativeOption::new(132, 1)),
    (SctpOption::InitMsg, NativeOption::new(132, 2)),
    (SctpOption::NoDelay, NativeOption::new(132, 3)),
    (SctpOption::AutoClose, NativeOption::new(132, 4)),
    (SctpOption::DisableFragments, NativeOption::new(132, 8)),
    (SctpOption::PeerAddressParams, NativeOption::new(132, 9)),
    (SctpOption::DefaultSendParams, NativeOption::new(132, 10)),
    (SctpOption::Events, NativeOption::new(132, 11)),
    (SctpOption::MappedV4, NativeOption::new(132, 12)),
    (SctpOption::MaxSegment, NativeOption::new(132, 13)),
    (SctpOption::Status, NativeOption::new(132, 14)),
    (SctpOption::AuthKey, NativeOption::new(132, 23)),
    (SctpOption::AuthActiveKey, NativeOption::new(132, 24)),
    (SctpOption::AuthDeleteKey, NativeOption::new(132, 25)),
    (SctpOption::AuthDeactivateKey, NativeOption::new(132, 35)),
    (SctpOption::AuthSupported, NativeOption::new(132, 129)),
    (SctpOption::Linger, NativeOption::new(1, 13)),
];

#[derive(Debug)]
pub(crate) struct MockHandle(u64);

/// 一次被记录的后端调用。
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Call {
    Open(Domain, Style),
    Close(u64),
    Bindx(Vec<SocketAddr>, BindMode),
    LocalPort,
    Connectx(Vec<SocketAddr>),
    Listen(i32),
    Shutdown(Shutdown),
    SetNonblocking(bool),
    Send { payload: Vec<u8>, params: SendParams },
    Recv { capacity: usize, flags: ReceiveFlags },
    Addresses(i32, AddressScope),
    Peeloff(i32),
    GetOption(SctpOption),
    SetOption(SctpOption, OptionValue),
}

/// 预先编排的接收结果。
#[derive(Clone, Debug)]
pub(crate) enum Scripted {
    Data {
        payload: Vec<u8>,
        info: RecvInfo,
        sender: Option<SocketAddr>,
    },
    Notification(Vec<u8>),
}

#[derive(Debug, Default)]
struct Recorder {
    calls: Vec<Call>,
    receives: VecDeque<Scripted>,
    options: HashMap<SctpOption, OptionValue>,
    addresses: HashMap<(i32, AddressScope), Vec<SocketAddr>>,
    failures: HashMap<&'static str, i32>,
    port: u16,
}

#[derive(Debug, Default)]
pub(crate) struct RecordingBackend {
    next_handle: AtomicU64,
    next_association: AtomicI32,
    recorder: Mutex<Recorder>,
}

impl RecordingBackend {
    pub(crate) fn calls(&self) -> Vec<Call> {
        self.recorder.lock().calls.clone()
    }

    pub(crate) fn clear_calls(&self) {
        self.recorder.lock().calls.clear();
    }

    pub(crate) fn sent_payloads(&self) -> Vec<Vec<u8>> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send { payload, .. } => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn push_receive(&self, scripted: Scripted) {
        self.recorder.lock().receives.push_back(scripted);
    }

    pub(crate) fn push_data(&self, payload: &[u8], info: RecvInfo) {
        self.push_receive(Scripted::Data {
            payload: payload.to_vec(),
            info,
            sender: None,
        });
    }

    pub(crate) fn push_notification(&self, buffer: Vec<u8>) {
        self.push_receive(Scripted::Notification(buffer));
    }

    pub(crate) fn set_addresses(&self, association_id: i32, scope: AddressScope, addrs: Vec<SocketAddr>) {
        self.recorder
            .lock()
            .addresses
            .insert((association_id, scope), addrs);
    }

    /// 让下一次指定操作以 `errno` 失败。
    pub(crate) fn fail_next(&self, op: Operation, errno: i32) {
        self.recorder.lock().failures.insert(op.code, errno);
    }

    fn record(&self, call: Call, op: Operation) -> Result<()> {
        let mut recorder = self.recorder.lock();
        recorder.calls.push(call);
        match recorder.failures.remove(op.code) {
            Some(errno) => Err(SctpError::from_errno(op, errno)),
            None => Ok(()),
        }
    }
}

impl SctpBackend for RecordingBackend {
    type Handle = MockHandle;

    const NAME: &'static str = "recording";
    const DIALECT: &'static NotificationDialect = &KERNEL_DIALECT;
    const CONCURRENT_IO: bool = false;

    fn native_options() -> &'static [(SctpOption, NativeOption)] {
        NATIVE_OPTIONS
    }

    fn initialize(_config: &SctpConfig) -> Result<Self> {
        Ok(Self::default())
    }

    fn handle_id(handle: &MockHandle) -> HandleId {
        HandleId(handle.0)
    }

    fn open(&self, domain: Domain, style: Style) -> Result<MockHandle> {
        self.record(Call::Open(domain, style), Operation::OPEN)?;
        Ok(MockHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 3))
    }

    fn close(&self, handle: MockHandle) -> Result<()> {
        self.record(Call::Close(handle.0), Operation::CLOSE)
    }

    fn bindx(&self, _handle: &MockHandle, addrs: &[SocketAddr], mode: BindMode) -> Result<()> {
        self.record(Call::Bindx(addrs.to_vec(), mode), Operation::BIND)?;
        let mut recorder = self.recorder.lock();
        if recorder.port == 0 {
            recorder.port = match addrs.first().map(SocketAddr::port) {
                Some(0) | None => EPHEMERAL_PORT_BASE,
                Some(port) => port,
            };
        }
        Ok(())
    }

    fn local_port(&self, _handle: &MockHandle) -> Result<u16> {
        self.record(Call::LocalPort, Operation::ADDRESSES)?;
        let mut recorder = self.recorder.lock();
        if recorder.port == 0 {
            recorder.port = EPHEMERAL_PORT_BASE;
        }
        Ok(recorder.port)
    }

    fn connectx(&self, _handle: &MockHandle, addrs: &[SocketAddr]) -> Result<i32> {
        self.record(Call::Connectx(addrs.to_vec()), Operation::CONNECT)?;
        Ok(self.next_association.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn listen(&self, _handle: &MockHandle, backlog: i32) -> Result<()> {
        self.record(Call::Listen(backlog), Operation::LISTEN)
    }

    fn shutdown(&self, _handle: &MockHandle, how: Shutdown) -> Result<()> {
        self.record(Call::Shutdown(how), Operation::SHUTDOWN)
    }

    fn set_nonblocking(&self, _handle: &MockHandle, nonblocking: bool) -> Result<()> {
        self.record(Call::SetNonblocking(nonblocking), Operation::CONFIGURE)
    }

    fn send_flat(&self, _handle: &MockHandle, payload: &[u8], params: &SendParams) -> Result<usize> {
        self.record(
            Call::Send {
                payload: payload.to_vec(),
                params: params.clone(),
            },
            Operation::SEND,
        )?;
        Ok(payload.len())
    }

    fn recv(&self, _handle: &MockHandle, buf: &mut [u8], flags: ReceiveFlags) -> Result<RawReceive> {
        self.record(
            Call::Recv {
                capacity: buf.len(),
                flags,
            },
            Operation::RECEIVE,
        )?;
        let mut recorder = self.recorder.lock();
        let scripted = if flags.contains(ReceiveFlags::PEEK) {
            recorder.receives.front().cloned()
        } else {
            recorder.receives.pop_front()
        };
        let Some(scripted) = scripted else {
            return Err(SctpError::from_errno(Operation::RECEIVE, nix::libc::EAGAIN));
        };
        let (bytes, info, sender, notification) = match scripted {
            Scripted::Data {
                payload,
                info,
                sender,
            } => (payload, Some(info), sender, false),
            Scripted::Notification(buffer) => (buffer, None, None, true),
        };
        let len = bytes.len().min(buf.len());
        buf[..len].copy_from_slice(&bytes[..len]);
        // 与真实协议栈一致：未读完的部分留在队列头部，下一次接收继续读取。
        if len < bytes.len() && !flags.contains(ReceiveFlags::PEEK) {
            let tail = bytes[len..].to_vec();
            let rest = if notification {
                Scripted::Notification(tail)
            } else {
                Scripted::Data {
                    payload: tail,
                    info: info.unwrap_or_default(),
                    sender,
                }
            };
            recorder.receives.push_front(rest);
        }
        Ok(RawReceive {
            len,
            sender,
            info,
            notification,
            end_of_record: len == bytes.len(),
        })
    }

    fn addresses(
        &self,
        _handle: &MockHandle,
        association_id: i32,
        scope: AddressScope,
    ) -> Result<Vec<SocketAddr>> {
        self.record(Call::Addresses(association_id, scope), Operation::ADDRESSES)?;
        Ok(self
            .recorder
            .lock()
            .addresses
            .get(&(association_id, scope))
            .cloned()
            .unwrap_or_default())
    }

    fn peeloff(&self, _handle: &MockHandle, association_id: i32) -> Result<MockHandle> {
        self.record(Call::Peeloff(association_id), Operation::PEELOFF)?;
        Ok(MockHandle(self.next_handle.fetch_add(1, Ordering::Relaxed) + 3))
    }

    fn get_option(
        &self,
        _handle: &MockHandle,
        option: ResolvedOption,
        _query: &OptionQuery,
    ) -> Result<OptionValue> {
        self.record(Call::GetOption(option.option), Operation::GET_OPTION)?;
        self.recorder
            .lock()
            .options
            .get(&option.option)
            .cloned()
            .ok_or_else(|| SctpError::from_errno(Operation::GET_OPTION, nix::libc::ENOPROTOOPT))
    }

    fn set_option(
        &self,
        _handle: &MockHandle,
        option: ResolvedOption,
        value: &OptionValue,
    ) -> Result<()> {
        self.record(
            Call::SetOption(option.option, value.clone()),
            Operation::SET_OPTION,
        )?;
        self.recorder
            .lock()
            .options
            .insert(option.option, value.clone());
        Ok(())
    }
}
