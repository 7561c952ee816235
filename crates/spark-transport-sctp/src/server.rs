//! 监听端便捷封装。
//!
//! # 模块定位（Why）
//! - 服务端的固定套路是"打开 → 订阅服务端事件 → 绑定 → 监听 → 读取分配的端口"，
//!   [`SctpServer`] 把这串步骤收拢为一次构造。
//!
//! # 暴露接口（What）
//! - [`ServerOptions`]：绑定地址、端口、backlog、分发模式与可选的套接字选项。
//! - [`SctpServer::accept`]：`PeelOff` 模式下把下一条新关联剥离为独立端点。
//! - `receive` / `send_to`：`Shared` 模式下在同一句柄上收发所有关联的消息。
//!
//! # 设计要点（How）
//! - 两种模式的监听句柄都是一对多风格；`PeelOff` 模式通过 `peeloff` 得到一对一端点，
//!   这是多关联套接字上唯一可移植的"accept"。
//! - `accept` 在看到某条关联的第一条数据或 comm up / restart 事件时剥离该关联，
//!   其他通知被跳过并记录调试日志。

use std::{fmt, net::IpAddr, time::Duration};

use bytes::Bytes;
use tracing::debug;

use crate::{
    address::{Domain, SctpAddress, Style},
    backend::{DefaultBackend, SctpBackend},
    endpoint::Endpoint,
    error::{Result, SctpError},
    message::{BindRequest, DataMessage, ReceiveRequest, ReceivedMessage, SendParams, SendRequest},
    notification::{AssociationChangeState, Notification},
    options::{EventMask, InitParams},
    stack::SctpStack,
};

/// 服务端默认 backlog。
pub const DEFAULT_BACKLOG: i32 = 128;

/// 关联的分发方式。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ServerMode {
    /// 所有关联共享监听句柄。
    #[default]
    Shared,
    /// 每条关联通过 `accept` 剥离为独立端点。
    PeelOff,
}

impl fmt::Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMode::Shared => f.write_str("one-to-many"),
            ServerMode::PeelOff => f.write_str("one-to-one"),
        }
    }
}

/// 服务端构造参数。
#[derive(Clone, Debug, PartialEq)]
pub struct ServerOptions {
    /// 为空时绑定该协议族的全部地址。
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    pub domain: Domain,
    pub mode: ServerMode,
    pub backlog: i32,
    pub subscriptions: EventMask,
    pub nodelay: Option<bool>,
    pub autoclose: Option<u32>,
    pub init_params: Option<InitParams>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            port: 0,
            domain: Domain::Ipv4,
            mode: ServerMode::Shared,
            backlog: DEFAULT_BACKLOG,
            subscriptions: EventMask::SERVER_DEFAULT,
            nodelay: None,
            autoclose: None,
            init_params: None,
        }
    }
}

impl ServerOptions {
    pub fn new(addresses: Vec<IpAddr>, port: u16) -> Self {
        let domain = if addresses.iter().any(IpAddr::is_ipv6) {
            Domain::Ipv6
        } else {
            Domain::Ipv4
        };
        Self {
            addresses,
            port,
            domain,
            ..Self::default()
        }
    }

    pub fn with_mode(mut self, mode: ServerMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_subscriptions(mut self, subscriptions: EventMask) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = Some(nodelay);
        self
    }

    pub fn with_autoclose(mut self, seconds: u32) -> Self {
        self.autoclose = Some(seconds);
        self
    }

    pub fn with_init_params(mut self, params: InitParams) -> Self {
        self.init_params = Some(params);
        self
    }
}

/// `accept` 的结果：剥离出的端点，以及触发剥离的第一条数据（若有）。
#[derive(Debug)]
pub struct Accepted<B: SctpBackend = DefaultBackend> {
    pub endpoint: Endpoint<B>,
    pub initial_message: Option<DataMessage>,
}

/// 已绑定并处于监听状态的服务端。
pub struct SctpServer<B: SctpBackend = DefaultBackend> {
    endpoint: Endpoint<B>,
    mode: ServerMode,
}

impl<B: SctpBackend> SctpServer<B> {
    /// 打开、配置、绑定并开始监听。
    pub fn bind(stack: &SctpStack<B>, options: ServerOptions) -> Result<Self> {
        let endpoint = stack.open(options.domain, Style::OneToMany)?;
        if let Some(nodelay) = options.nodelay {
            endpoint.set_nodelay(nodelay)?;
        }
        if let Some(seconds) = options.autoclose {
            endpoint.set_autoclose(seconds)?;
        }
        if let Some(params) = options.init_params {
            endpoint.set_init_params(params)?;
        }
        if !options.subscriptions.is_empty() {
            endpoint.subscribe(options.subscriptions)?;
        }
        let port = endpoint.bind(&BindRequest::new(options.addresses, options.port))?;
        endpoint.listen(options.backlog)?;
        debug!(
            backend = B::NAME,
            op = "listen",
            handle = %endpoint.id(),
            port,
            mode = %options.mode,
            backlog = options.backlog,
            "sctp server listening"
        );
        Ok(Self {
            endpoint,
            mode: options.mode,
        })
    }

    /// 等待下一条新关联并将其剥离为独立端点，仅适用于 `PeelOff` 模式。
    pub fn accept(&self) -> Result<Accepted<B>> {
        if self.mode != ServerMode::PeelOff {
            return Err(SctpError::argument(
                "accept is only available in peel-off mode",
            ));
        }
        loop {
            let (association_id, initial_message) = match self.endpoint.receive(ReceiveRequest::default())? {
                ReceivedMessage::Data(data) => (data.association_id, Some(data)),
                ReceivedMessage::Event(Notification::AssociationChange(change))
                    if matches!(
                        change.state,
                        AssociationChangeState::CommUp | AssociationChangeState::Restart
                    ) =>
                {
                    (change.association_id, None)
                }
                ReceivedMessage::Event(event) => {
                    debug!(
                        backend = B::NAME,
                        op = "accept",
                        kind = %event.kind(),
                        association_id = event.association_id(),
                        "skipping notification while accepting"
                    );
                    continue;
                }
            };
            let endpoint = self.endpoint.peeloff(association_id)?;
            return Ok(Accepted {
                endpoint,
                initial_message,
            });
        }
    }

    /// 从任意关联接收。
    pub fn receive(&self, request: ReceiveRequest) -> Result<ReceivedMessage> {
        self.endpoint.receive(request)
    }

    /// 向指定关联发送。
    pub fn send_to(
        &self,
        association_id: i32,
        payload: impl Into<Bytes>,
        params: SendParams,
    ) -> Result<usize> {
        if association_id == 0 {
            return Err(SctpError::argument("send_to requires an association id"));
        }
        self.endpoint
            .send(&SendRequest::new(payload, params.with_association(association_id)))
    }

    pub fn local_addresses(&self) -> Result<Vec<SctpAddress>> {
        self.endpoint.local_addresses(0)
    }

    pub fn local_port(&self) -> u16 {
        self.endpoint.local_port()
    }

    pub fn mode(&self) -> ServerMode {
        self.mode
    }

    pub fn endpoint(&self) -> &Endpoint<B> {
        &self.endpoint
    }

    pub fn is_closed(&self) -> bool {
        self.endpoint.is_closed()
    }

    /// 关闭监听句柄；已关闭时什么也不做。
    pub fn close(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.endpoint.close()
    }

    pub fn close_with_linger(&self, linger: Duration) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.endpoint.close_with_linger(linger)
    }
}

impl<B: SctpBackend> fmt::Display for SctpServer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_closed() {
            return f.write_str("closed");
        }
        let addresses = self
            .local_addresses()
            .unwrap_or_default()
            .iter()
            .map(SctpAddress::ip_text)
            .collect::<Vec<_>>()
            .join(",");
        write!(f, "{addresses}:{} ({})", self.local_port(), self.mode)
    }
}

impl<B: SctpBackend> fmt::Debug for SctpServer<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SctpServer")
            .field("endpoint", &self.endpoint)
            .field("mode", &self.mode)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr};

    use super::*;
    use crate::{
        address::{AddressScope, BindMode},
        backend::{
            RecvInfo,
            testing::{Call, EPHEMERAL_PORT_BASE, RecordingBackend},
        },
        capability::Capabilities,
        config::SctpConfig,
        notification::{KERNEL_DIALECT, tests::NotificationBuilder},
        options::{OptionValue, SctpOption},
    };

    fn stack() -> SctpStack<RecordingBackend> {
        SctpStack::from_backend(
            RecordingBackend::default(),
            Capabilities::default(),
            SctpConfig::default(),
        )
        .expect("stack")
    }

    fn localhost() -> IpAddr {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    }

    #[test]
    fn bind_subscribes_binds_and_listens() {
        let stack = stack();
        let server = SctpServer::bind(&stack, ServerOptions::new(vec![localhost()], 0)).expect("server");
        assert_eq!(server.local_port(), EPHEMERAL_PORT_BASE);
        assert_eq!(
            stack.backend().calls(),
            vec![
                Call::Open(Domain::Ipv4, Style::OneToMany),
                Call::SetOption(
                    SctpOption::Events,
                    OptionValue::Events(EventMask::SERVER_DEFAULT)
                ),
                Call::Bindx(vec![SocketAddr::new(localhost(), 0)], BindMode::Add),
                Call::LocalPort,
                Call::Listen(DEFAULT_BACKLOG),
            ]
        );
    }

    #[test]
    fn socket_options_are_applied_before_bind() {
        let stack = stack();
        let options = ServerOptions::default()
            .with_nodelay(true)
            .with_autoclose(15)
            .with_subscriptions(EventMask::empty());
        let _server = SctpServer::bind(&stack, options).expect("server");
        let calls = stack.backend().calls();
        assert_eq!(calls[1], Call::SetOption(SctpOption::NoDelay, OptionValue::Flag(true)));
        assert_eq!(calls[2], Call::SetOption(SctpOption::AutoClose, OptionValue::Seconds(15)));
        assert!(matches!(calls[3], Call::Bindx(..)));
    }

    #[test]
    fn accept_requires_peel_off_mode() {
        let stack = stack();
        let server = SctpServer::bind(&stack, ServerOptions::default()).expect("server");
        assert!(server.accept().expect_err("shared mode").is_argument());
    }

    #[test]
    fn accept_peels_off_on_first_data() {
        let stack = stack();
        let server = SctpServer::bind(
            &stack,
            ServerOptions::default().with_mode(ServerMode::PeelOff),
        )
        .expect("server");
        let shutdown = NotificationBuilder::new(KERNEL_DIALECT.tags.shutdown, 0)
            .i32(9)
            .build();
        stack.backend().push_notification(shutdown);
        stack.backend().push_data(
            b"hello",
            RecvInfo {
                association_id: 5,
                ..RecvInfo::default()
            },
        );

        let accepted = server.accept().expect("accept");
        assert_eq!(accepted.endpoint.default_association_id(), 5);
        assert_eq!(accepted.endpoint.style(), Style::OneToOne);
        let first = accepted.initial_message.expect("initial message");
        assert_eq!(&first.payload[..], b"hello");
        assert!(stack.backend().calls().contains(&Call::Peeloff(5)));
    }

    #[test]
    fn accept_peels_off_on_comm_up() {
        let stack = stack();
        let server = SctpServer::bind(
            &stack,
            ServerOptions::default().with_mode(ServerMode::PeelOff),
        )
        .expect("server");
        let comm_up = NotificationBuilder::new(KERNEL_DIALECT.tags.association_change, 0)
            .u16(KERNEL_DIALECT.association_states[0])
            .u16(0)
            .u16(4)
            .u16(4)
            .i32(8)
            .build();
        stack.backend().push_notification(comm_up);
        let accepted = server.accept().expect("accept");
        assert!(accepted.initial_message.is_none());
        assert_eq!(accepted.endpoint.default_association_id(), 8);
    }

    #[test]
    fn send_to_targets_association() {
        let stack = stack();
        let server = SctpServer::bind(&stack, ServerOptions::default()).expect("server");
        assert!(
            server
                .send_to(0, &b"x"[..], SendParams::default())
                .expect_err("no association")
                .is_argument()
        );
        server
            .send_to(3, &b"echo"[..], SendParams::default())
            .expect("send");
        let params = stack
            .backend()
            .calls()
            .into_iter()
            .find_map(|call| match call {
                Call::Send { params, .. } => Some(params),
                _ => None,
            })
            .expect("send recorded");
        assert_eq!(params.association_id, 3);
    }

    #[test]
    fn display_reports_addresses_port_and_mode() {
        let stack = stack();
        let server = SctpServer::bind(&stack, ServerOptions::new(vec![localhost()], 7000)).expect("server");
        stack.backend().set_addresses(
            0,
            AddressScope::Local,
            vec![SocketAddr::new(localhost(), 7000)],
        );
        assert_eq!(server.to_string(), "127.0.0.1:7000 (one-to-many)");

        server.close().expect("close");
        server.close().expect("second close is a no-op");
        assert_eq!(server.to_string(), "closed");
    }
}
