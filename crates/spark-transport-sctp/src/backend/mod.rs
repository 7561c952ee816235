//! 传输后端契约。
//!
//! # 模块定位（Why）
//! - 内核 SCTP 与 usrsctp 在句柄类型（文件描述符 vs `struct socket*`）、选项命名、
//!   分散 / 聚集调用约定以及辅助信息传递方式上都不同。[`SctpBackend`] 把它们收敛为
//!   同一组操作，端点代码不出现任何"当前是哪个后端"的分支。
//! - 构建期只链接一个实现：默认特性 `kernel` 选择 [`KernelBackend`]，启用 `usrsctp`
//!   特性后 [`DefaultBackend`] 切换为 [`UsrsctpBackend`]。
//!
//! # 契约（What）
//! - 句柄由后端创建，只能通过 [`SctpBackend::close`] 以**所有权转移**的方式释放，
//!   类型系统保证"恰好释放一次"。
//! - 所有方法都是同步的，可能阻塞；后端不创建线程、不做轮询。
//! - 参数校验由端点在调用前完成；后端只负责布局翻译与系统调用，失败时原样透传 errno。
//!
//! # 实现要点（How）
//! - 不支持原生分散发送的后端只需实现 [`SctpBackend::send_flat`]，默认的
//!   [`SctpBackend::send_vectored`] 会按顺序拼接所有片段后调用它。
//! - 选项的原生坐标由调用方从集中式选项表解析后传入（[`ResolvedOption`]）。

use std::{
    fmt,
    io::IoSlice,
    net::{Shutdown, SocketAddr},
};

use crate::{
    address::{AddressScope, BindMode, Domain, Style},
    capability::{Capabilities, NativeOption, SubscriptionLayout},
    config::SctpConfig,
    error::Result,
    message::{ReceiveFlags, RecvInfoFlags, SendParams},
    notification::NotificationDialect,
    options::{OptionQuery, OptionValue, SctpOption},
};

pub(crate) mod layout;

#[cfg(all(feature = "kernel", target_os = "linux"))]
pub mod kernel;
#[cfg(feature = "usrsctp")]
pub mod usrsctp;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(all(feature = "kernel", target_os = "linux"))]
pub use kernel::KernelBackend;
#[cfg(feature = "usrsctp")]
pub use usrsctp::UsrsctpBackend;

/// 构建期选定的后端。
#[cfg(feature = "usrsctp")]
pub type DefaultBackend = UsrsctpBackend;
#[cfg(all(not(feature = "usrsctp"), feature = "kernel", target_os = "linux"))]
pub type DefaultBackend = KernelBackend;

/// 句柄的稳定标识，用于日志与"两个句柄不相等"的断言。
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct HandleId(pub u64);

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 接收侧辅助信息（`sctp_sndrcvinfo` / `sctp_rcvinfo` 的公共子集）。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RecvInfo {
    pub stream: u16,
    pub ssn: u16,
    pub flags: RecvInfoFlags,
    pub ppid: u32,
    pub context: u32,
    pub ttl: u32,
    pub tsn: u32,
    pub cumtsn: u32,
    pub association_id: i32,
}

/// 一次原生接收的结果。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct RawReceive {
    pub len: usize,
    pub sender: Option<SocketAddr>,
    pub info: Option<RecvInfo>,
    /// 接收标志中带有通知位。
    pub notification: bool,
    /// 本次读取到达了消息边界。
    pub end_of_record: bool,
}

/// 已由选项表解析出原生坐标的选项。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ResolvedOption {
    pub option: SctpOption,
    pub native: NativeOption,
    pub subscription: SubscriptionLayout,
}

/// 传输后端契约。
pub trait SctpBackend: Send + Sync + Sized + 'static {
    type Handle: fmt::Debug + Send + Sync;

    /// 后端名称，用于日志与错误信息。
    const NAME: &'static str;

    /// 通知类型 / 状态编号的方言。
    const DIALECT: &'static NotificationDialect;

    /// 同一句柄上是否允许并发进入（内核：是；usrsctp：否）。
    const CONCURRENT_IO: bool;

    /// 逻辑选项到原生坐标的全集，由选项表按能力描述过滤。
    fn native_options() -> &'static [(SctpOption, NativeOption)];

    /// 未提供外部能力描述时使用的默认值。
    fn default_capabilities() -> Capabilities {
        Capabilities::default()
    }

    /// 建立进程级运行时（如需要）并返回后端实例。
    fn initialize(config: &SctpConfig) -> Result<Self>;

    fn handle_id(handle: &Self::Handle) -> HandleId;

    fn open(&self, domain: Domain, style: Style) -> Result<Self::Handle>;

    /// 释放句柄；句柄所有权在此终结。
    fn close(&self, handle: Self::Handle) -> Result<()>;

    fn bindx(&self, handle: &Self::Handle, addrs: &[SocketAddr], mode: BindMode) -> Result<()>;

    /// 已绑定的本地端口（端口 0 绑定后由协议栈分配的值）。
    fn local_port(&self, handle: &Self::Handle) -> Result<u16>;

    /// 发起（多宿主）关联，返回关联标识。
    fn connectx(&self, handle: &Self::Handle, addrs: &[SocketAddr]) -> Result<i32>;

    fn listen(&self, handle: &Self::Handle, backlog: i32) -> Result<()>;

    fn shutdown(&self, handle: &Self::Handle, how: Shutdown) -> Result<()>;

    fn set_nonblocking(&self, handle: &Self::Handle, nonblocking: bool) -> Result<()>;

    /// 发送一段连续缓冲区。
    fn send_flat(&self, handle: &Self::Handle, payload: &[u8], params: &SendParams)
    -> Result<usize>;

    /// 分散发送；默认实现按顺序拼接片段后委托给 [`send_flat`](Self::send_flat)。
    fn send_vectored(
        &self,
        handle: &Self::Handle,
        fragments: &[IoSlice<'_>],
        params: &SendParams,
    ) -> Result<usize> {
        let payload = gather(fragments);
        self.send_flat(handle, &payload, params)
    }

    fn recv(&self, handle: &Self::Handle, buf: &mut [u8], flags: ReceiveFlags)
    -> Result<RawReceive>;

    fn addresses(
        &self,
        handle: &Self::Handle,
        association_id: i32,
        scope: AddressScope,
    ) -> Result<Vec<SocketAddr>>;

    /// 把一条关联剥离为独立的一对一句柄。
    fn peeloff(&self, handle: &Self::Handle, association_id: i32) -> Result<Self::Handle>;

    fn get_option(
        &self,
        handle: &Self::Handle,
        option: ResolvedOption,
        query: &OptionQuery,
    ) -> Result<OptionValue>;

    fn set_option(
        &self,
        handle: &Self::Handle,
        option: ResolvedOption,
        value: &OptionValue,
    ) -> Result<()>;
}

/// 按顺序拼接片段为一段连续缓冲区。
pub fn gather(fragments: &[IoSlice<'_>]) -> Vec<u8> {
    let total = fragments.iter().map(|fragment| fragment.len()).sum();
    let mut payload = Vec::with_capacity(total);
    for fragment in fragments {
        payload.extend_from_slice(fragment);
    }
    payload
}
