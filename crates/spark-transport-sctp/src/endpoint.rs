//! SCTP 端点。
//!
//! # 设计动机（Why）
//! - 端点是调用方看到的唯一"套接字"：它独占一个后端句柄，维护生命周期状态，
//!   并在进入后端之前完成所有参数校验，使后端只剩下布局翻译与系统调用。
//! - 关联标识 `0` 在调用方语义中表示"端点的默认关联"，而不是某条真实关联；
//!   这一替换只在端点里发生一次。
//!
//! # 核心契约（What）
//! - 状态：`Unbound → Bound → Associated`，`Bound → Listening`，任意状态 `→ Closed`。
//!   `Closed` 为终态，此后每个操作都返回 [`SctpError::Closed`]。
//! - 句柄恰好释放一次：`close` 把句柄从槽位中取出并以所有权转移交给后端；
//!   未显式关闭的端点在 `Drop` 中关闭，失败只记录告警。
//! - `peeloff` 产生一个独立拥有句柄的新端点，源端点不受影响。
//! - 参数错误（地址个数、backlog 上限、空分片列表、非正缓冲区）在任何后端调用之前返回。
//!
//! # 实现策略（How）
//! - 句柄存放在 `RwLock<Option<Handle>>` 中：普通操作持读锁，`close` 持写锁取出句柄，
//!   因而关闭与进行中的 I/O 互斥，关闭后的 I/O 观察到空槽位。
//! - 后端声明 `CONCURRENT_IO = false` 时，每个操作额外持有端点级互斥门。
//! - 加锁顺序固定为"门 → 句柄 → 生命周期"；调用后端期间不持有生命周期锁。
//!
//! # 风险与考量（Trade-offs）
//! - 阻塞中的 `receive` 会推迟并发的 `close`，直到接收返回；需要可中断关闭的调用方
//!   应使用非阻塞模式或接收超时。
//! - 截断策略为 `Error` 时，超长消息的前缀已被协议栈交付并丢弃，剩余部分仍会在
//!   下一次接收中出现。

use std::{
    fmt,
    io::IoSlice,
    net::{Shutdown, SocketAddr},
    time::Duration,
};

use bytes::{Bytes, BytesMut};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::{
    address::{AddressScope, BindMode, Domain, SctpAddress, Style, expand_addresses},
    backend::{DefaultBackend, HandleId, ResolvedOption, SctpBackend},
    config::TruncationPolicy,
    error::{DecodeError, Result, SctpError},
    message::{
        BindRequest, ConnectRequest, DataMessage, ReceiveFlags, ReceiveRequest, ReceivedMessage,
        SendParams, SendRequest,
    },
    notification::decode_with_cap,
    options::{
        AssocParams, AuthKey, AuthKeyId, EventMask, InitParams, OptionQuery, OptionValue,
        PeerAddressParams, RtoInfo, SctpOption, SendInfo, Status,
    },
    stack::SctpStack,
};

/// 端点生命周期状态。
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum EndpointState {
    Unbound,
    Bound,
    Associated,
    Listening,
    Closed,
}

impl fmt::Display for EndpointState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EndpointState::Unbound => "unbound",
            EndpointState::Bound => "bound",
            EndpointState::Associated => "associated",
            EndpointState::Listening => "listening",
            EndpointState::Closed => "closed",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Copy, Debug)]
struct Lifecycle {
    state: EndpointState,
    bound_port: u16,
    default_association_id: i32,
}

/// 独占一个后端句柄的 SCTP 端点。
pub struct Endpoint<B: SctpBackend = DefaultBackend> {
    stack: SctpStack<B>,
    handle: RwLock<Option<B::Handle>>,
    gate: Mutex<()>,
    id: HandleId,
    domain: Domain,
    style: Style,
    lifecycle: Mutex<Lifecycle>,
}

/// 从选项值中取出期望的变体，不符时返回参数错误。
macro_rules! expect_value {
    ($value:expr, $option:expr, $variant:ident) => {
        match $value {
            OptionValue::$variant(inner) => Ok(inner),
            other => Err(OptionValue::mismatch($option, &other)),
        }
    };
}

impl<B: SctpBackend> Endpoint<B> {
    pub(crate) fn open(stack: SctpStack<B>, domain: Domain, style: Style) -> Result<Self> {
        let handle = stack.backend().open(domain, style)?;
        let id = B::handle_id(&handle);
        debug!(backend = B::NAME, op = "open", handle = %id, ?domain, %style, "endpoint opened");
        Ok(Self::from_handle(
            stack,
            handle,
            domain,
            style,
            Lifecycle {
                state: EndpointState::Unbound,
                bound_port: 0,
                default_association_id: 0,
            },
        ))
    }

    fn from_handle(
        stack: SctpStack<B>,
        handle: B::Handle,
        domain: Domain,
        style: Style,
        lifecycle: Lifecycle,
    ) -> Self {
        Self {
            id: B::handle_id(&handle),
            stack,
            handle: RwLock::new(Some(handle)),
            gate: Mutex::new(()),
            domain,
            style,
            lifecycle: Mutex::new(lifecycle),
        }
    }

    /// 在句柄上执行一次后端调用；句柄已释放时返回 `Closed`。
    fn with_handle<T>(&self, call: impl FnOnce(&B, &B::Handle) -> Result<T>) -> Result<T> {
        let _gate = (!B::CONCURRENT_IO).then(|| self.gate.lock());
        let slot = self.handle.read();
        let handle = slot.as_ref().ok_or(SctpError::Closed)?;
        call(self.stack.backend(), handle)
    }

    fn snapshot(&self) -> Result<Lifecycle> {
        let lifecycle = *self.lifecycle.lock();
        if lifecycle.state == EndpointState::Closed {
            return Err(SctpError::Closed);
        }
        Ok(lifecycle)
    }

    fn max_addresses(&self) -> usize {
        self.stack.config().max_addresses
    }

    /// 绑定本地地址；返回实际生效的端口（端口 0 时为协议栈分配的值）。
    ///
    /// 空地址列表表示通配地址。已绑定的端点再次 `Add` 时沿用已绑定端口，显式给出
    /// 不同端口会被拒绝。
    pub fn bind(&self, request: &BindRequest) -> Result<u16> {
        let lifecycle = self.snapshot()?;
        let bound = lifecycle.bound_port != 0;
        if request.mode == BindMode::Remove && !bound {
            return Err(SctpError::argument(
                "cannot remove addresses from an unbound endpoint",
            ));
        }
        if bound && request.port != 0 && request.port != lifecycle.bound_port {
            return Err(SctpError::argument(format!(
                "endpoint is already bound to port {}, cannot bind port {}",
                lifecycle.bound_port, request.port
            )));
        }
        let port = if bound {
            lifecycle.bound_port
        } else {
            request.port
        };
        let addrs = expand_addresses(&request.addresses, port, self.domain, self.max_addresses())?;

        let port = self.with_handle(|backend, handle| {
            backend.bindx(handle, &addrs, request.mode)?;
            if port == 0 {
                backend.local_port(handle)
            } else {
                Ok(port)
            }
        })?;

        let mut lifecycle = self.lifecycle.lock();
        lifecycle.bound_port = port;
        if lifecycle.state == EndpointState::Unbound {
            lifecycle.state = EndpointState::Bound;
        }
        debug!(
            backend = B::NAME,
            op = "bind",
            handle = %self.id,
            port,
            addresses = addrs.len(),
            mode = ?request.mode,
            "addresses bound"
        );
        Ok(port)
    }

    /// 向一个或多个对端地址发起关联，返回关联标识。
    ///
    /// 未绑定的端点由协议栈隐式绑定，随后读取分配的端口。
    pub fn connect(&self, request: &ConnectRequest) -> Result<i32> {
        let lifecycle = self.snapshot()?;
        if request.addresses.is_empty() {
            return Err(SctpError::argument("connect requires at least one address"));
        }
        if request.port == 0 {
            return Err(SctpError::argument("connect requires a non-zero port"));
        }
        let addrs = expand_addresses(
            &request.addresses,
            request.port,
            self.domain,
            self.max_addresses(),
        )?;

        let (association_id, port) = self.with_handle(|backend, handle| {
            let association_id = backend.connectx(handle, &addrs)?;
            let port = if lifecycle.bound_port == 0 {
                backend.local_port(handle)?
            } else {
                lifecycle.bound_port
            };
            Ok((association_id, port))
        })?;

        let mut lifecycle = self.lifecycle.lock();
        lifecycle.default_association_id = association_id;
        lifecycle.bound_port = port;
        if lifecycle.state != EndpointState::Listening {
            lifecycle.state = EndpointState::Associated;
        }
        debug!(
            backend = B::NAME,
            op = "connect",
            handle = %self.id,
            association_id,
            port,
            peers = addrs.len(),
            "association requested"
        );
        Ok(association_id)
    }

    /// 开始监听；`backlog` 超出 `[0, max_backlog]` 时直接拒绝，不会被静默截断。
    pub fn listen(&self, backlog: i32) -> Result<()> {
        let max_backlog = self.stack.options().max_backlog();
        if !(0..=max_backlog).contains(&backlog) {
            return Err(SctpError::argument(format!(
                "backlog {backlog} is outside 0..={max_backlog}"
            )));
        }
        let lifecycle = self.snapshot()?;
        if !matches!(
            lifecycle.state,
            EndpointState::Bound | EndpointState::Listening
        ) {
            return Err(SctpError::argument(format!(
                "cannot listen on a {} endpoint",
                lifecycle.state
            )));
        }
        self.with_handle(|backend, handle| backend.listen(handle, backlog))?;
        self.lifecycle.lock().state = EndpointState::Listening;
        debug!(backend = B::NAME, op = "listen", handle = %self.id, backlog, "listening");
        Ok(())
    }

    /// 发送一条消息；多个分片按顺序拼接为同一条 SCTP 消息。
    pub fn send(&self, request: &SendRequest) -> Result<usize> {
        if request.fragments.is_empty() {
            return Err(SctpError::argument("send must contain at least one message"));
        }
        let params = self.resolve_send_params(&request.params)?;
        let implicit = self.snapshot()?.state == EndpointState::Unbound;
        let fragments: Vec<IoSlice<'_>> = request
            .fragments
            .iter()
            .map(|fragment| IoSlice::new(fragment))
            .collect();

        let (sent, port) = self.with_handle(|backend, handle| {
            let sent = backend.send_vectored(handle, &fragments, &params)?;
            let port = if implicit {
                Some(backend.local_port(handle)?)
            } else {
                None
            };
            Ok((sent, port))
        })?;

        if let Some(port) = port {
            let mut lifecycle = self.lifecycle.lock();
            lifecycle.bound_port = port;
            if lifecycle.state == EndpointState::Unbound {
                lifecycle.state = EndpointState::Associated;
            }
        }
        debug!(
            backend = B::NAME,
            op = "send",
            handle = %self.id,
            association_id = params.association_id,
            stream = params.stream,
            fragments = fragments.len(),
            bytes = sent,
            "message sent"
        );
        Ok(sent)
    }

    /// 以单段缓冲区发送。
    pub fn send_bytes(&self, payload: impl Into<Bytes>, params: SendParams) -> Result<usize> {
        self.send(&SendRequest::new(payload, params))
    }

    /// 校验发送参数并把关联标识 `0` 替换为端点默认关联。
    fn resolve_send_params(&self, params: &SendParams) -> Result<SendParams> {
        params.flags.validate()?;
        if params.destinations.len() > self.max_addresses() {
            return Err(SctpError::argument(format!(
                "too many destinations: {} (maximum {})",
                params.destinations.len(),
                self.max_addresses()
            )));
        }
        if params.destinations.iter().any(|addr| addr.port() == 0) {
            return Err(SctpError::argument("destination port must be non-zero"));
        }
        let lifecycle = self.snapshot()?;
        let has_destinations = !params.destinations.is_empty();
        if lifecycle.state == EndpointState::Unbound && !has_destinations {
            return Err(SctpError::argument(
                "an unbound endpoint can only send to explicit destinations",
            ));
        }
        let mut resolved = params.clone();
        if resolved.association_id == 0 {
            resolved.association_id = lifecycle.default_association_id;
        }
        if self.style == Style::OneToMany && resolved.association_id == 0 && !has_destinations {
            return Err(SctpError::argument(
                "one-to-many send needs an association id or destinations",
            ));
        }
        Ok(resolved)
    }

    /// 接收一条消息或一条通知。
    pub fn receive(&self, request: ReceiveRequest) -> Result<ReceivedMessage> {
        let config = self.stack.config();
        let capacity = request.buffer_size.unwrap_or(config.receive.buffer_size);
        if capacity == 0 {
            return Err(SctpError::argument("buffer size must be positive"));
        }
        let default_association_id = self.snapshot()?.default_association_id;
        let mut buffer = BytesMut::zeroed(capacity);
        let (raw, discarded) = self.with_handle(|backend, handle| {
            let raw = backend.recv(handle, &mut buffer, request.flags)?;
            let discarded = if raw.notification
                && !raw.end_of_record
                && !request.flags.contains(ReceiveFlags::PEEK)
            {
                discard_notification_tail(backend, handle, capacity, request.flags)?
            } else {
                0
            };
            Ok((raw, discarded))
        })?;
        buffer.truncate(raw.len);

        if raw.notification {
            if !raw.end_of_record {
                debug!(
                    backend = B::NAME,
                    op = "receive",
                    handle = %self.id,
                    received = raw.len,
                    discarded,
                    "oversized notification dropped"
                );
                return Err(DecodeError::Incomplete { received: raw.len }.into());
            }
            let event = decode_with_cap(&buffer, B::DIALECT, config.notification_data_cap)?;
            debug!(
                backend = B::NAME,
                op = "receive",
                handle = %self.id,
                association_id = event.association_id(),
                kind = %event.kind(),
                "notification received"
            );
            return Ok(ReceivedMessage::Event(event));
        }

        // 长度为 0 表示对端关闭，没有需要补齐的剩余部分。
        let complete = raw.end_of_record || raw.len == 0;
        if !complete && config.receive.truncation == TruncationPolicy::Error {
            return Err(SctpError::MessageTooLarge { capacity });
        }
        let info = raw.info.unwrap_or_default();
        let association_id = if info.association_id != 0 {
            info.association_id
        } else {
            default_association_id
        };
        debug!(
            backend = B::NAME,
            op = "receive",
            handle = %self.id,
            association_id,
            stream = info.stream,
            bytes = raw.len,
            complete,
            "data received"
        );
        Ok(ReceivedMessage::Data(DataMessage {
            payload: buffer.freeze(),
            stream: info.stream,
            ssn: info.ssn,
            flags: info.flags,
            ppid: info.ppid,
            context: info.context,
            ttl: info.ttl,
            tsn: info.tsn,
            cumtsn: info.cumtsn,
            association_id,
            sender: raw.sender.map(SctpAddress::from),
            complete,
        }))
    }

    /// 本端地址；`association_id == 0` 表示端点级地址集合。
    pub fn local_addresses(&self, association_id: i32) -> Result<Vec<SctpAddress>> {
        self.snapshot()?;
        self.addresses(association_id, AddressScope::Local)
    }

    /// 对端地址；`association_id == 0` 使用默认关联。
    pub fn peer_addresses(&self, association_id: i32) -> Result<Vec<SctpAddress>> {
        let association_id = self.resolve_association(association_id)?;
        self.addresses(association_id, AddressScope::Peer)
    }

    fn addresses(&self, association_id: i32, scope: AddressScope) -> Result<Vec<SctpAddress>> {
        let addrs = self.with_handle(|backend, handle| backend.addresses(handle, association_id, scope))?;
        Ok(addrs.into_iter().map(SctpAddress::from).collect())
    }

    fn resolve_association(&self, association_id: i32) -> Result<i32> {
        let lifecycle = self.snapshot()?;
        Ok(if association_id == 0 {
            lifecycle.default_association_id
        } else {
            association_id
        })
    }

    /// 把一条关联剥离为新的一对一端点；源端点保持不变。
    pub fn peeloff(&self, association_id: i32) -> Result<Endpoint<B>> {
        let association_id = self.resolve_association(association_id)?;
        if association_id == 0 {
            return Err(SctpError::argument("peeloff requires an association id"));
        }
        let bound_port = self.snapshot()?.bound_port;
        let handle = self.with_handle(|backend, handle| backend.peeloff(handle, association_id))?;
        let peeled = Self::from_handle(
            self.stack.clone(),
            handle,
            self.domain,
            Style::OneToOne,
            Lifecycle {
                state: EndpointState::Associated,
                bound_port,
                default_association_id: association_id,
            },
        );
        debug!(
            backend = B::NAME,
            op = "peeloff",
            handle = %self.id,
            peeled = %peeled.id,
            association_id,
            "association peeled off"
        );
        Ok(peeled)
    }

    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        self.snapshot()?;
        self.with_handle(|backend, handle| backend.shutdown(handle, how))?;
        debug!(backend = B::NAME, op = "shutdown", handle = %self.id, ?how, "shutdown");
        Ok(())
    }

    pub fn set_nonblocking(&self, nonblocking: bool) -> Result<()> {
        self.snapshot()?;
        self.with_handle(|backend, handle| backend.set_nonblocking(handle, nonblocking))
    }

    /// 释放句柄；重复关闭返回 `Closed`。
    pub fn close(&self) -> Result<()> {
        let handle = {
            let _gate = (!B::CONCURRENT_IO).then(|| self.gate.lock());
            let mut slot = self.handle.write();
            let handle = slot.take().ok_or(SctpError::Closed)?;
            self.lifecycle.lock().state = EndpointState::Closed;
            handle
        };
        self.stack.backend().close(handle)?;
        debug!(backend = B::NAME, op = "close", handle = %self.id, "endpoint closed");
        Ok(())
    }

    /// 先设置 `SO_LINGER` 再关闭。
    pub fn close_with_linger(&self, linger: Duration) -> Result<()> {
        self.set_linger(Some(linger))?;
        self.close()
    }

    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }

    pub fn style(&self) -> Style {
        self.style
    }

    pub fn state(&self) -> EndpointState {
        self.lifecycle.lock().state
    }

    pub fn is_closed(&self) -> bool {
        self.state() == EndpointState::Closed
    }

    /// 已绑定端口；未绑定时为 0。
    pub fn local_port(&self) -> u16 {
        self.lifecycle.lock().bound_port
    }

    pub fn default_association_id(&self) -> i32 {
        self.lifecycle.lock().default_association_id
    }

    pub fn stack(&self) -> &SctpStack<B> {
        &self.stack
    }

    fn resolve_option(&self, option: SctpOption) -> Result<ResolvedOption> {
        let table = self.stack.options();
        Ok(ResolvedOption {
            option,
            native: table.resolve(option)?,
            subscription: table.subscription(),
        })
    }

    /// 通用选项读取；查询中的关联标识 `0` 使用默认关联。
    pub fn get_option(&self, option: SctpOption, query: OptionQuery) -> Result<OptionValue> {
        let resolved = self.resolve_option(option)?;
        let query = OptionQuery {
            association_id: self.resolve_association(query.association_id)?,
            ..query
        };
        self.with_handle(|backend, handle| backend.get_option(handle, resolved, &query))
    }

    /// 通用选项写入。
    pub fn set_option(&self, option: SctpOption, value: OptionValue) -> Result<()> {
        let resolved = self.resolve_option(option)?;
        if let OptionValue::SendInfo(info) = &value {
            info.flags.validate()?;
        }
        self.snapshot()?;
        self.with_handle(|backend, handle| backend.set_option(handle, resolved, &value))?;
        debug!(backend = B::NAME, op = "set_option", handle = %self.id, ?option, "option updated");
        Ok(())
    }

    fn get_endpoint_option(&self, option: SctpOption) -> Result<OptionValue> {
        self.get_option(option, OptionQuery::default())
    }

    pub fn nodelay(&self) -> Result<bool> {
        let option = SctpOption::NoDelay;
        expect_value!(self.get_endpoint_option(option)?, option, Flag)
    }

    pub fn set_nodelay(&self, on: bool) -> Result<()> {
        self.set_option(SctpOption::NoDelay, OptionValue::Flag(on))
    }

    /// 空闲关联自动关闭的秒数，0 表示关闭该功能。
    pub fn autoclose(&self) -> Result<u32> {
        let option = SctpOption::AutoClose;
        expect_value!(self.get_endpoint_option(option)?, option, Seconds)
    }

    pub fn set_autoclose(&self, seconds: u32) -> Result<()> {
        self.set_option(SctpOption::AutoClose, OptionValue::Seconds(seconds))
    }

    pub fn init_params(&self) -> Result<InitParams> {
        let option = SctpOption::InitMsg;
        expect_value!(self.get_endpoint_option(option)?, option, Init)
    }

    pub fn set_init_params(&self, params: InitParams) -> Result<()> {
        self.set_option(SctpOption::InitMsg, OptionValue::Init(params))
    }

    pub fn subscriptions(&self) -> Result<EventMask> {
        let option = SctpOption::Events;
        expect_value!(self.get_endpoint_option(option)?, option, Events)
    }

    /// 以 `events` 替换当前订阅；集合之外的事件全部关闭。
    pub fn subscribe(&self, events: EventMask) -> Result<()> {
        self.set_option(SctpOption::Events, OptionValue::Events(events))
    }

    pub fn status(&self, association_id: i32) -> Result<Status> {
        let option = SctpOption::Status;
        let value = self.get_option(option, OptionQuery::association(association_id))?;
        expect_value!(value, option, Status)
    }

    pub fn rto_info(&self, association_id: i32) -> Result<RtoInfo> {
        let option = SctpOption::RtoInfo;
        let value = self.get_option(option, OptionQuery::association(association_id))?;
        expect_value!(value, option, Rto)
    }

    pub fn set_rto_info(&self, info: RtoInfo) -> Result<()> {
        self.set_option(SctpOption::RtoInfo, OptionValue::Rto(info))
    }

    pub fn association_info(&self, association_id: i32) -> Result<AssocParams> {
        let option = SctpOption::AssociationInfo;
        let value = self.get_option(option, OptionQuery::association(association_id))?;
        expect_value!(value, option, Association)
    }

    pub fn set_association_info(&self, params: AssocParams) -> Result<()> {
        self.set_option(SctpOption::AssociationInfo, OptionValue::Association(params))
    }

    pub fn peer_address_params(
        &self,
        association_id: i32,
        address: Option<SocketAddr>,
    ) -> Result<PeerAddressParams> {
        let option = SctpOption::PeerAddressParams;
        let value = self.get_option(
            option,
            OptionQuery {
                association_id,
                address,
            },
        )?;
        expect_value!(value, option, PeerAddress)
    }

    pub fn set_peer_address_params(&self, params: PeerAddressParams) -> Result<()> {
        self.set_option(SctpOption::PeerAddressParams, OptionValue::PeerAddress(params))
    }

    pub fn default_send_params(&self, association_id: i32) -> Result<SendInfo> {
        let option = SctpOption::DefaultSendParams;
        let value = self.get_option(option, OptionQuery::association(association_id))?;
        expect_value!(value, option, SendInfo)
    }

    pub fn set_default_send_params(&self, info: SendInfo) -> Result<()> {
        self.set_option(SctpOption::DefaultSendParams, OptionValue::SendInfo(info))
    }

    pub fn map_ipv4(&self) -> Result<bool> {
        let option = SctpOption::MappedV4;
        expect_value!(self.get_endpoint_option(option)?, option, Flag)
    }

    pub fn set_map_ipv4(&self, on: bool) -> Result<()> {
        self.set_option(SctpOption::MappedV4, OptionValue::Flag(on))
    }

    pub fn disable_fragments(&self) -> Result<bool> {
        let option = SctpOption::DisableFragments;
        expect_value!(self.get_endpoint_option(option)?, option, Flag)
    }

    pub fn set_disable_fragments(&self, on: bool) -> Result<()> {
        self.set_option(SctpOption::DisableFragments, OptionValue::Flag(on))
    }

    pub fn max_segment(&self) -> Result<u32> {
        let option = SctpOption::MaxSegment;
        expect_value!(self.get_endpoint_option(option)?, option, Value)
    }

    pub fn set_max_segment(&self, size: u32) -> Result<()> {
        self.set_option(SctpOption::MaxSegment, OptionValue::Value(size))
    }

    /// 安装共享密钥（SCTP-AUTH）。
    pub fn set_shared_key(&self, key: AuthKey) -> Result<()> {
        self.set_option(SctpOption::AuthKey, OptionValue::AuthKey(key))
    }

    pub fn active_shared_key(&self, association_id: i32) -> Result<AuthKeyId> {
        let option = SctpOption::AuthActiveKey;
        let value = self.get_option(option, OptionQuery::association(association_id))?;
        expect_value!(value, option, KeyId)
    }

    pub fn set_active_shared_key(&self, key: AuthKeyId) -> Result<()> {
        self.set_option(SctpOption::AuthActiveKey, OptionValue::KeyId(key))
    }

    pub fn delete_shared_key(&self, key: AuthKeyId) -> Result<()> {
        self.set_option(SctpOption::AuthDeleteKey, OptionValue::KeyId(key))
    }

    pub fn deactivate_shared_key(&self, key: AuthKeyId) -> Result<()> {
        self.set_option(SctpOption::AuthDeactivateKey, OptionValue::KeyId(key))
    }

    pub fn auth_support(&self) -> Result<bool> {
        let option = SctpOption::AuthSupported;
        expect_value!(self.get_endpoint_option(option)?, option, Flag)
    }

    pub fn set_auth_support(&self, on: bool) -> Result<()> {
        self.set_option(SctpOption::AuthSupported, OptionValue::Flag(on))
    }

    pub fn receive_timeout(&self) -> Result<Option<Duration>> {
        let option = SctpOption::ReceiveTimeout;
        expect_value!(self.get_endpoint_option(option)?, option, Timeout)
    }

    pub fn set_receive_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.set_option(SctpOption::ReceiveTimeout, OptionValue::Timeout(timeout))
    }

    pub fn send_timeout(&self) -> Result<Option<Duration>> {
        let option = SctpOption::SendTimeout;
        expect_value!(self.get_endpoint_option(option)?, option, Timeout)
    }

    pub fn set_send_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        self.set_option(SctpOption::SendTimeout, OptionValue::Timeout(timeout))
    }

    pub fn linger(&self) -> Result<Option<Duration>> {
        let option = SctpOption::Linger;
        expect_value!(self.get_endpoint_option(option)?, option, Linger)
    }

    pub fn set_linger(&self, linger: Option<Duration>) -> Result<()> {
        self.set_option(SctpOption::Linger, OptionValue::Linger(linger))
    }
}

/// 读完一条超出缓冲区的通知的剩余部分，返回丢弃的字节数。
///
/// 协议栈把未读完的通知尾部留在接收队列头部，且仍带通知标志；不读掉它，
/// 下一次接收会把尾部当作一条新通知从偏移 0 解码。
fn discard_notification_tail<B: SctpBackend>(
    backend: &B,
    handle: &B::Handle,
    capacity: usize,
    flags: ReceiveFlags,
) -> Result<usize> {
    let mut scratch = vec![0u8; capacity];
    let mut discarded = 0;
    loop {
        let raw = backend.recv(handle, &mut scratch, flags)?;
        discarded += raw.len;
        if raw.end_of_record || !raw.notification || raw.len == 0 {
            return Ok(discarded);
        }
    }
}

impl<B: SctpBackend> fmt::Debug for Endpoint<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = *self.lifecycle.lock();
        f.debug_struct("Endpoint")
            .field("backend", &B::NAME)
            .field("id", &self.id)
            .field("domain", &self.domain)
            .field("style", &self.style)
            .field("state", &lifecycle.state)
            .field("bound_port", &lifecycle.bound_port)
            .field("default_association_id", &lifecycle.default_association_id)
            .finish()
    }
}

impl<B: SctpBackend> Drop for Endpoint<B> {
    fn drop(&mut self) {
        let Some(handle) = self.handle.get_mut().take() else {
            return;
        };
        self.lifecycle.get_mut().state = EndpointState::Closed;
        if let Err(err) = self.stack.backend().close(handle) {
            warn!(
                backend = B::NAME,
                handle = %self.id,
                code = err.code(),
                error = %err,
                "failed to close endpoint on drop"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;
    use crate::{
        backend::{
            RecvInfo,
            testing::{Call, EPHEMERAL_PORT_BASE, RecordingBackend},
        },
        capability::Capabilities,
        config::SctpConfig,
        error::Operation,
        message::ReceiveFlags,
        notification::{
            AssociationChangeState, KERNEL_DIALECT, Notification,
            tests::NotificationBuilder,
        },
    };

    fn stack_with(config: SctpConfig) -> SctpStack<RecordingBackend> {
        SctpStack::from_backend(RecordingBackend::default(), Capabilities::default(), config)
            .expect("stack")
    }

    fn stack() -> SctpStack<RecordingBackend> {
        stack_with(SctpConfig::default())
    }

    fn loopback(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, last))
    }

    fn bound(stack: &SctpStack<RecordingBackend>, port: u16) -> Endpoint<RecordingBackend> {
        let endpoint = stack.open(Domain::Ipv4, Style::OneToMany).expect("open");
        endpoint.bind(&BindRequest::any(port)).expect("bind");
        stack.backend().clear_calls();
        endpoint
    }

    #[test]
    fn bind_reads_back_assigned_port() {
        let stack = stack();
        let endpoint = stack.open(Domain::Ipv4, Style::OneToMany).expect("open");
        assert_eq!(endpoint.state(), EndpointState::Unbound);

        let port = endpoint.bind(&BindRequest::any(0)).expect("bind");
        assert_eq!(port, EPHEMERAL_PORT_BASE);
        assert_eq!(endpoint.local_port(), EPHEMERAL_PORT_BASE);
        assert_eq!(endpoint.state(), EndpointState::Bound);
        assert_eq!(
            stack.backend().calls()[1..],
            [
                Call::Bindx(
                    vec![SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)],
                    BindMode::Add
                ),
                Call::LocalPort,
            ]
        );
    }

    #[tracing_test::traced_test]
    #[test]
    fn bind_emits_structured_event() {
        let stack = stack();
        let endpoint = stack.open(Domain::Ipv4, Style::OneToMany).expect("open");
        endpoint
            .bind(&BindRequest::new(vec![loopback(1), loopback(2)], 5000))
            .expect("bind");
        assert!(logs_contain("addresses bound"));
        assert!(logs_contain("port=5000"));
        assert!(logs_contain("addresses=2"));
    }

    #[test]
    fn conflicting_rebind_fails_before_backend() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        let err = endpoint
            .bind(&BindRequest::new(vec![loopback(1)], 6000))
            .expect_err("port conflict");
        assert!(err.is_argument());
        assert!(stack.backend().calls().is_empty());
    }

    #[test]
    fn second_bind_reuses_bound_port() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        let port = endpoint
            .bind(&BindRequest::new(vec![loopback(2)], 0))
            .expect("add address");
        assert_eq!(port, 5000);
        assert_eq!(
            stack.backend().calls(),
            vec![Call::Bindx(
                vec![SocketAddr::new(loopback(2), 5000)],
                BindMode::Add
            )]
        );
    }

    #[test]
    fn remove_on_unbound_endpoint_is_rejected() {
        let stack = stack();
        let endpoint = stack.open(Domain::Ipv4, Style::OneToMany).expect("open");
        let err = endpoint
            .bind(&BindRequest::new(vec![loopback(1)], 0).with_mode(BindMode::Remove))
            .expect_err("unbound remove");
        assert!(err.is_argument());
    }

    #[test]
    fn too_many_addresses_are_rejected() {
        let mut config = SctpConfig::default();
        config.max_addresses = 2;
        let stack = stack_with(config);
        let endpoint = stack.open(Domain::Ipv4, Style::OneToMany).expect("open");
        stack.backend().clear_calls();
        let err = endpoint
            .connect(&ConnectRequest::new(
                vec![loopback(1), loopback(2), loopback(3)],
                9,
            ))
            .expect_err("too many");
        assert!(err.is_argument());
        assert!(stack.backend().calls().is_empty());
    }

    #[test]
    fn multi_homed_connect_passes_every_address() {
        let stack = stack();
        let endpoint = stack.open(Domain::Ipv4, Style::OneToMany).expect("open");
        let association_id = endpoint
            .connect(&ConnectRequest::new(vec![loopback(1), loopback(2)], 9000))
            .expect("connect");
        assert_eq!(association_id, 1);
        assert_eq!(endpoint.default_association_id(), 1);
        assert_eq!(endpoint.state(), EndpointState::Associated);
        assert_eq!(endpoint.local_port(), EPHEMERAL_PORT_BASE);
        assert!(stack.backend().calls().contains(&Call::Connectx(vec![
            SocketAddr::new(loopback(1), 9000),
            SocketAddr::new(loopback(2), 9000),
        ])));
    }

    #[test]
    fn connect_requires_addresses_and_port() {
        let stack = stack();
        let endpoint = stack.open(Domain::Ipv4, Style::OneToMany).expect("open");
        assert!(
            endpoint
                .connect(&ConnectRequest::new(Vec::new(), 9000))
                .expect_err("no addresses")
                .is_argument()
        );
        assert!(
            endpoint
                .connect(&ConnectRequest::new(vec![loopback(1)], 0))
                .expect_err("no port")
                .is_argument()
        );
    }

    #[test]
    fn connect_failure_surfaces_errno() {
        let stack = stack();
        let endpoint = stack.open(Domain::Ipv4, Style::OneToMany).expect("open");
        stack
            .backend()
            .fail_next(Operation::CONNECT, nix::libc::ECONNREFUSED);
        let err = endpoint
            .connect(&ConnectRequest::new(vec![loopback(1)], 9000))
            .expect_err("refused");
        assert_eq!(err.errno(), Some(nix::libc::ECONNREFUSED));
        assert_eq!(endpoint.state(), EndpointState::Unbound);
    }

    #[test]
    fn backlog_bound_is_checked_before_backend() {
        let stack = stack_with(SctpConfig::default().with_max_backlog(64));
        let endpoint = bound(&stack, 5000);
        assert!(endpoint.listen(65).expect_err("too large").is_argument());
        assert!(endpoint.listen(-1).expect_err("negative").is_argument());
        assert!(stack.backend().calls().is_empty());

        endpoint.listen(64).expect("listen");
        assert_eq!(stack.backend().calls(), vec![Call::Listen(64)]);
        assert_eq!(endpoint.state(), EndpointState::Listening);
    }

    #[test]
    fn listen_requires_bound_endpoint() {
        let stack = stack();
        let endpoint = stack.open(Domain::Ipv4, Style::OneToMany).expect("open");
        assert!(endpoint.listen(4).expect_err("unbound").is_argument());
    }

    #[test]
    fn scatter_send_is_concatenated_in_order() {
        let stack = stack();
        let endpoint = stack.open(Domain::Ipv4, Style::OneToMany).expect("open");
        endpoint
            .connect(&ConnectRequest::new(vec![loopback(1)], 9000))
            .expect("connect");
        let request = SendRequest::vectored(
            vec![
                Bytes::from_static(b"hello "),
                Bytes::new(),
                Bytes::from_static(b"world"),
            ],
            SendParams::default().with_stream(2),
        );
        assert_eq!(endpoint.send(&request).expect("send"), 11);
        assert_eq!(stack.backend().sent_payloads(), vec![b"hello world".to_vec()]);
    }

    #[test]
    fn send_without_fragments_is_rejected() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        let err = endpoint
            .send(&SendRequest::vectored(Vec::new(), SendParams::default()))
            .expect_err("empty");
        assert!(err.is_argument());
        assert!(stack.backend().calls().is_empty());
    }

    #[test]
    fn association_zero_resolves_to_default() {
        let stack = stack();
        let endpoint = stack.open(Domain::Ipv4, Style::OneToMany).expect("open");
        endpoint
            .connect(&ConnectRequest::new(vec![loopback(1)], 9000))
            .expect("connect");
        endpoint
            .send_bytes(&b"ping"[..], SendParams::default().with_ppid(51))
            .expect("send");
        let sent = stack
            .backend()
            .calls()
            .into_iter()
            .find_map(|call| match call {
                Call::Send { params, .. } => Some(params),
                _ => None,
            })
            .expect("send recorded");
        assert_eq!(sent.association_id, 1);
        assert_eq!(sent.ppid, 51);
    }

    #[test]
    fn one_to_many_send_needs_a_target() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        let err = endpoint
            .send_bytes(&b"x"[..], SendParams::default())
            .expect_err("no target");
        assert!(err.is_argument());

        let target = SocketAddr::new(loopback(1), 9000);
        endpoint
            .send_bytes(&b"x"[..], SendParams::default().with_destinations(vec![target]))
            .expect("explicit destination");
    }

    #[test]
    fn unbound_send_to_destination_sets_up_implicitly() {
        let stack = stack();
        let endpoint = stack.open(Domain::Ipv4, Style::OneToMany).expect("open");
        let target = SocketAddr::new(loopback(1), 9000);
        endpoint
            .send_bytes(&b"x"[..], SendParams::default().with_destinations(vec![target]))
            .expect("send");
        assert_eq!(endpoint.state(), EndpointState::Associated);
        assert_eq!(endpoint.local_port(), EPHEMERAL_PORT_BASE);
    }

    #[test]
    fn conflicting_pr_policies_are_rejected() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        let params = SendParams::default()
            .with_association(3)
            .with_flags(crate::message::SendFlags::PR_TTL | crate::message::SendFlags::PR_RTX);
        assert!(endpoint.send_bytes(&b"x"[..], params).expect_err("policy").is_argument());
    }

    #[test]
    fn zero_buffer_size_is_rejected() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        let err = endpoint
            .receive(ReceiveRequest::default().with_buffer_size(0))
            .expect_err("zero");
        assert!(err.is_argument());
        assert!(stack.backend().calls().is_empty());
    }

    #[test]
    fn receive_maps_data_and_info() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        stack.backend().push_data(
            b"payload",
            RecvInfo {
                stream: 4,
                ssn: 9,
                ppid: 51,
                association_id: 7,
                ..RecvInfo::default()
            },
        );
        let message = endpoint
            .receive(ReceiveRequest::default())
            .expect("receive")
            .into_data()
            .expect("data");
        assert_eq!(&message.payload[..], b"payload");
        assert_eq!(message.stream, 4);
        assert_eq!(message.ssn, 9);
        assert_eq!(message.ppid, 51);
        assert_eq!(message.association_id, 7);
        assert!(message.complete);
        assert_eq!(
            stack.backend().calls(),
            vec![Call::Recv {
                capacity: 1024,
                flags: ReceiveFlags::empty()
            }]
        );
    }

    #[test]
    fn truncated_message_is_reported_or_rejected() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        stack.backend().push_data(b"0123456789", RecvInfo::default());
        let message = endpoint
            .receive(ReceiveRequest::default().with_buffer_size(4))
            .expect("receive")
            .into_data()
            .expect("data");
        assert_eq!(&message.payload[..], b"0123");
        assert!(!message.complete);

        let strict = stack_with(SctpConfig::default().with_truncation(TruncationPolicy::Error));
        let endpoint = bound(&strict, 5000);
        strict.backend().push_data(b"0123456789", RecvInfo::default());
        let err = endpoint
            .receive(ReceiveRequest::default().with_buffer_size(4))
            .expect_err("too large");
        assert!(matches!(err, SctpError::MessageTooLarge { capacity: 4 }));
    }

    #[test]
    fn notifications_are_decoded_from_receive_flag() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        let buffer = NotificationBuilder::new(KERNEL_DIALECT.tags.association_change, 0)
            .u16(KERNEL_DIALECT.association_states[0])
            .u16(0)
            .u16(10)
            .u16(10)
            .i32(12)
            .build();
        stack.backend().push_notification(buffer);
        let message = endpoint.receive(ReceiveRequest::default()).expect("receive");
        assert!(message.is_notification());
        assert_eq!(message.association_id(), 12);
        let Some(Notification::AssociationChange(change)) = message.as_notification() else {
            panic!("expected association change");
        };
        assert_eq!(change.state, AssociationChangeState::CommUp);
    }

    #[test]
    fn partial_notification_is_incomplete() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        let buffer = NotificationBuilder::new(KERNEL_DIALECT.tags.shutdown, 0)
            .i32(12)
            .build();
        stack.backend().push_notification(buffer);
        let err = endpoint
            .receive(ReceiveRequest::default().with_buffer_size(4))
            .expect_err("partial");
        assert!(matches!(
            err,
            SctpError::Decode(DecodeError::Incomplete { received: 4 })
        ));
    }

    #[test]
    fn oversized_notification_tail_is_not_decoded_as_next_event() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        let oversized = NotificationBuilder::new(KERNEL_DIALECT.tags.remote_error, 0)
            .u16(0x0001)
            .i32(12)
            .raw(&[0xab; 40])
            .build();
        let next = NotificationBuilder::new(KERNEL_DIALECT.tags.shutdown, 0)
            .i32(13)
            .build();
        stack.backend().push_notification(oversized);
        stack.backend().push_notification(next);

        let err = endpoint
            .receive(ReceiveRequest::default().with_buffer_size(16))
            .expect_err("oversized");
        assert!(matches!(
            err,
            SctpError::Decode(DecodeError::Incomplete { received: 16 })
        ));

        let message = endpoint.receive(ReceiveRequest::default()).expect("receive");
        assert!(matches!(
            message.as_notification(),
            Some(Notification::Shutdown(_))
        ));
        assert_eq!(message.association_id(), 13);
    }

    #[test]
    fn peeked_partial_notification_stays_queued() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        let buffer = NotificationBuilder::new(KERNEL_DIALECT.tags.shutdown, 0)
            .i32(12)
            .build();
        stack.backend().push_notification(buffer);
        let err = endpoint
            .receive(
                ReceiveRequest::default()
                    .with_buffer_size(4)
                    .with_flags(ReceiveFlags::PEEK),
            )
            .expect_err("partial");
        assert!(matches!(err, SctpError::Decode(DecodeError::Incomplete { .. })));

        let message = endpoint.receive(ReceiveRequest::default()).expect("receive");
        assert_eq!(message.association_id(), 12);
        assert!(message.is_notification());
    }

    #[test]
    fn truncated_data_tail_arrives_on_next_receive() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        stack.backend().push_data(b"0123456789", RecvInfo::default());
        let head = endpoint
            .receive(ReceiveRequest::default().with_buffer_size(4))
            .expect("head")
            .into_data()
            .expect("data");
        assert!(!head.complete);
        let tail = endpoint
            .receive(ReceiveRequest::default())
            .expect("tail")
            .into_data()
            .expect("data");
        assert_eq!(&tail.payload[..], b"456789");
        assert!(tail.complete);
    }

    #[test]
    fn subscribe_replaces_previous_subscription() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        endpoint.subscribe(EventMask::SERVER_DEFAULT).expect("server default");
        endpoint.subscribe(EventMask::SHUTDOWN).expect("shutdown only");
        assert_eq!(endpoint.subscriptions().expect("subscriptions"), EventMask::SHUTDOWN);
    }

    #[test]
    fn peeloff_yields_independent_endpoint() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        let peeled = endpoint.peeloff(21).expect("peeloff");
        assert_ne!(peeled.id(), endpoint.id());
        assert_eq!(peeled.style(), Style::OneToOne);
        assert_eq!(peeled.state(), EndpointState::Associated);
        assert_eq!(peeled.default_association_id(), 21);
        assert_eq!(peeled.local_port(), 5000);
        assert_eq!(endpoint.state(), EndpointState::Bound);

        peeled.close().expect("close peeled");
        assert!(!endpoint.is_closed());
        assert_eq!(
            stack.backend().calls(),
            vec![Call::Peeloff(21), Call::Close(peeled.id().0)]
        );
    }

    #[test]
    fn peeloff_without_association_is_rejected() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        assert!(endpoint.peeloff(0).expect_err("no association").is_argument());
    }

    #[test]
    fn closed_endpoint_rejects_every_operation() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        endpoint.close().expect("close");
        assert!(endpoint.is_closed());
        assert!(matches!(endpoint.close(), Err(SctpError::Closed)));
        assert!(matches!(
            endpoint.bind(&BindRequest::any(0)),
            Err(SctpError::Closed)
        ));
        assert!(matches!(
            endpoint.receive(ReceiveRequest::default()),
            Err(SctpError::Closed)
        ));
        assert!(matches!(endpoint.nodelay(), Err(SctpError::Closed)));
        let id = endpoint.id().0;
        drop(endpoint);
        assert_eq!(stack.backend().calls(), vec![Call::Close(id)]);
    }

    #[test]
    fn drop_releases_handle_once() {
        let stack = stack();
        let endpoint = stack.open(Domain::Ipv4, Style::OneToOne).expect("open");
        let id = endpoint.id().0;
        drop(endpoint);
        let closes = stack
            .backend()
            .calls()
            .into_iter()
            .filter(|call| *call == Call::Close(id))
            .count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn close_with_linger_sets_option_first() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        let id = endpoint.id().0;
        endpoint
            .close_with_linger(Duration::from_secs(5))
            .expect("close");
        assert_eq!(
            stack.backend().calls(),
            vec![
                Call::SetOption(
                    SctpOption::Linger,
                    OptionValue::Linger(Some(Duration::from_secs(5)))
                ),
                Call::Close(id),
            ]
        );
    }

    #[test]
    fn typed_options_round_trip_through_backend() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        endpoint.set_nodelay(true).expect("set nodelay");
        assert!(endpoint.nodelay().expect("nodelay"));
        endpoint.set_autoclose(30).expect("set autoclose");
        assert_eq!(endpoint.autoclose().expect("autoclose"), 30);
    }

    #[test]
    fn unsupported_option_is_reported_without_backend_call() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        let err = endpoint.receive_timeout().expect_err("unsupported");
        assert!(matches!(
            err,
            SctpError::Unsupported {
                option: SctpOption::ReceiveTimeout,
                backend: "recording"
            }
        ));
        assert!(stack.backend().calls().is_empty());
    }

    #[test]
    fn mismatched_option_value_is_an_argument_error() {
        let stack = stack();
        let endpoint = bound(&stack, 5000);
        endpoint
            .set_option(SctpOption::NoDelay, OptionValue::Seconds(3))
            .expect("recording backend stores any value");
        assert!(endpoint.nodelay().expect_err("wrong variant").is_argument());
    }
}
