//! 进程级协议栈入口。
//!
//! # 设计动机（Why）
//! - usrsctp 需要在进程内初始化一次、并在所有套接字关闭后回收一次；若把这件事隐藏在
//!   第一次 `open` 中，回收时机就无从表达。[`SctpStack`] 把"运行时 + 选项表 + 配置"
//!   组合为一个显式作用域，最后一个克隆释放时后端随之释放。
//!
//! # 核心契约（What）
//! - `SctpStack::new` 对同一后端在同一进程内只能成功一次（usrsctp），重复调用返回
//!   [`RuntimeError::AlreadyInitialized`](crate::RuntimeError::AlreadyInitialized)。
//! - 选项表在构建时按能力描述生成，之后只读；所有由本栈打开的端点共享同一份。
//! - 每个新端点自动应用配置中的默认事件订阅。
//!
//! # 风险与考量（Trade-offs）
//! - 端点持有栈内部的 `Arc`，因此只要仍有端点存活，后端就不会被回收。

use std::{fmt, sync::Arc};

use tracing::debug;

use crate::{
    address::{Domain, Style},
    backend::{DefaultBackend, SctpBackend},
    capability::{Capabilities, OptionTable},
    config::SctpConfig,
    endpoint::Endpoint,
    error::Result,
};

/// 后端运行时、选项表与配置的共享句柄。
pub struct SctpStack<B: SctpBackend = DefaultBackend> {
    backend: Arc<B>,
    options: Arc<OptionTable>,
    config: Arc<SctpConfig>,
}

impl<B: SctpBackend> Clone for SctpStack<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            options: Arc::clone(&self.options),
            config: Arc::clone(&self.config),
        }
    }
}

impl<B: SctpBackend> fmt::Debug for SctpStack<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SctpStack")
            .field("backend", &B::NAME)
            .field("max_backlog", &self.options.max_backlog())
            .finish()
    }
}

impl<B: SctpBackend> SctpStack<B> {
    /// 以后端默认能力描述初始化。
    pub fn new(config: SctpConfig) -> Result<Self> {
        Self::with_capabilities(config, B::default_capabilities())
    }

    /// 以外部提供的能力描述初始化。
    pub fn with_capabilities(config: SctpConfig, capabilities: Capabilities) -> Result<Self> {
        let config = config.validated()?;
        let backend = B::initialize(&config)?;
        Self::from_backend(backend, capabilities, config)
    }

    /// 接管一个已构造的后端实例。
    pub fn from_backend(backend: B, capabilities: Capabilities, config: SctpConfig) -> Result<Self> {
        let config = config.validated()?;
        let mut options = OptionTable::build(B::NAME, B::native_options(), &capabilities);
        if let Some(max_backlog) = config.max_backlog {
            options = options.with_max_backlog(max_backlog);
        }
        debug!(
            backend = B::NAME,
            max_backlog = options.max_backlog(),
            subscriptions = ?config.default_subscriptions().names(),
            "sctp stack ready"
        );
        Ok(Self {
            backend: Arc::new(backend),
            options: Arc::new(options),
            config: Arc::new(config),
        })
    }

    /// 打开一个新端点并应用默认订阅。
    pub fn open(&self, domain: Domain, style: Style) -> Result<Endpoint<B>> {
        let endpoint = Endpoint::open(self.clone(), domain, style)?;
        let subscriptions = self.config.default_subscriptions();
        if !subscriptions.is_empty() {
            endpoint.subscribe(subscriptions)?;
        }
        Ok(endpoint)
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn options(&self) -> &OptionTable {
        &self.options
    }

    pub fn config(&self) -> &SctpConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::testing::{Call, RecordingBackend},
        options::{EventMask, OptionValue, SctpOption},
    };

    #[test]
    fn config_backlog_overrides_capabilities() {
        let stack = SctpStack::from_backend(
            RecordingBackend::default(),
            Capabilities::default(),
            SctpConfig::default().with_max_backlog(16),
        )
        .expect("stack");
        assert_eq!(stack.options().max_backlog(), 16);
        assert_eq!(stack.options().backend(), "recording");
    }

    #[test]
    fn open_applies_default_subscriptions() {
        let config = SctpConfig::default().with_default_subscriptions(EventMask::SERVER_DEFAULT);
        let stack =
            SctpStack::from_backend(RecordingBackend::default(), Capabilities::default(), config)
                .expect("stack");
        let _endpoint = stack.open(Domain::Ipv4, Style::OneToMany).expect("open");
        assert_eq!(
            stack.backend().calls(),
            vec![
                Call::Open(Domain::Ipv4, Style::OneToMany),
                Call::SetOption(
                    SctpOption::Events,
                    OptionValue::Events(EventMask::SERVER_DEFAULT)
                ),
            ]
        );
    }

    #[test]
    fn open_without_subscriptions_only_opens() {
        let stack = SctpStack::from_backend(
            RecordingBackend::default(),
            Capabilities::default(),
            SctpConfig::default(),
        )
        .expect("stack");
        let _endpoint = stack.open(Domain::Ipv6, Style::OneToOne).expect("open");
        assert_eq!(
            stack.backend().calls(),
            vec![Call::Open(Domain::Ipv6, Style::OneToOne)]
        );
    }
}
