#![doc = r#"
# spark-transport-sctp

## 设计动机（Why）
- **定位**：为应用代码提供类套接字的 SCTP 抽象，同一套接口既可跑在内核 SCTP 协议栈上，
  也可跑在进程内的 usrsctp 用户态协议栈上。
- **架构角色**：把两套原生 API 在句柄类型、选项命名、分散 / 聚集调用约定与辅助信息
  传递方式上的差异收敛到 [`SctpBackend`] 之后；把协议栈以内联消息形式投递的控制事件
  解码为强类型的 [`Notification`]。
- **设计理念**：参数错误在进入后端之前拦截；后端错误原样保留 errno；协议事件不是错误。

## 核心契约（What）
- **入口**：[`SctpStack`] 负责一次性的进程级初始化（usrsctp）、集中式选项表与配置；
  [`SctpStack::open`] 返回 [`Endpoint`]。
- **端点**：`bind` / `connect` / `listen` / `send` / `receive` / `peeloff` / `close`，
  以及强类型的选项读写；关闭后所有操作返回 [`SctpError::Closed`]。
- **消息**：[`Endpoint::receive`] 依据接收调用返回的通知标志，产出
  [`ReceivedMessage::Data`] 或 [`ReceivedMessage::Event`]。
- **后端选择**：构建期决定。默认特性 `kernel` 在 Linux 上使用内核协议栈；启用 `usrsctp`
  特性后改用 usrsctp，调用方代码无需改动。

## 实现策略（How）
- 所有调用同步且可能阻塞；本 crate 不创建线程，也不做事件轮询。需要非阻塞时使用
  [`Endpoint::set_nonblocking`] 或接收 / 发送超时选项。
- 逻辑选项名到原生 `(level, name)` 的翻译只发生在 [`OptionTable`] 中，该表由后端的
  原生名列表与外部提供的 [`Capabilities`] 生成。
- 通知解码器对声明长度、固定部分与尾随数组逐一做边界校验，并按后端方言
  （[`NotificationDialect`]）解释类型与状态编号。

## 风险与考量（Trade-offs）
- usrsctp 协议栈是进程级全局状态，同一进程内只能存在一个 usrsctp [`SctpStack`] 根实例；
  重复初始化返回 [`RuntimeError::AlreadyInitialized`]。
- 内核后端依赖宿主内核加载 SCTP 模块；缺失时 `open` 返回携带 errno 的传输错误。
"#]

#[cfg(not(any(feature = "usrsctp", all(feature = "kernel", target_os = "linux"))))]
compile_error!(
    "spark-transport-sctp needs a backend: enable `usrsctp`, or build the `kernel` feature on Linux"
);

mod address;
pub mod backend;
mod capability;
mod config;
mod endpoint;
mod error;
mod message;
pub mod notification;
mod options;
mod server;
mod stack;

pub use address::{
    AddressScope, BindMode, DEFAULT_MAX_ADDRESSES, Domain, SctpAddress, Style, parse_ip,
};
pub use backend::{DefaultBackend, HandleId, RecvInfo, SctpBackend};
pub use capability::{Capabilities, NativeOption, OptionTable, SendFailureNaming, SubscriptionLayout};
pub use config::{
    ConfigError, DEFAULT_RECEIVE_BUFFER, DEFAULT_UDP_ENCAPSULATION_PORT, ReceiveConfig, SctpConfig,
    TruncationPolicy, UsrsctpConfig,
};
pub use endpoint::{Endpoint, EndpointState};
pub use error::{DecodeError, Operation, Result, RuntimeError, SctpError};
pub use message::{
    BindRequest, ConnectRequest, DataMessage, PrPolicy, ReceiveFlags, ReceiveRequest,
    ReceivedMessage, RecvInfoFlags, SendFlags, SendParams, SendRequest,
};
pub use notification::{Notification, NotificationDialect, NotificationKind};
pub use options::{
    AssocParams, AssociationState, AuthKey, AuthKeyId, EventMask, InitParams, OptionQuery,
    OptionValue, PathState, PeerAddressFlags, PeerAddressInfo, PeerAddressParams, RtoInfo,
    SctpOption, SendInfo, Status,
};
pub use server::{Accepted, DEFAULT_BACKLOG, SctpServer, ServerMode, ServerOptions};
pub use stack::SctpStack;
