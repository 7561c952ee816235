//! SCTP 传输的统一错误模型。
//!
//! # 模块定位（Why）
//! - 两个后端（内核 / usrsctp）的失败形态各不相同：前者返回 `-1 + errno`，后者在部分
//!   入口返回空指针。本模块把它们收敛为一个 [`SctpError`]，调用方无需感知后端差异。
//! - 参数错误必须在触达后端之前暴露，因此与传输错误分属不同变体，便于测试断言
//!   "失败时后端未被调用"。
//!
//! # 暴露接口（What）
//! - [`SctpError`]：crate 对外唯一错误类型，`code()` 返回稳定错误码。
//! - [`Operation`]：失败操作的稳定编码与默认文案，沿用传输层 `OperationKind` 的形态。
//! - [`DecodeError`]：通知解码失败的细分原因。

use std::{borrow::Cow, io};

use thiserror::Error;

use crate::{config::ConfigError, options::SctpOption};

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Operation {
    pub code: &'static str,
    pub message: &'static str,
}

impl Operation {
    pub const OPEN: Operation = Operation {
        code: "spark.transport.sctp.open_failed",
        message: "sctp open",
    };
    pub const BIND: Operation = Operation {
        code: "spark.transport.sctp.bindx_failed",
        message: "sctp bindx",
    };
    pub const CONNECT: Operation = Operation {
        code: "spark.transport.sctp.connectx_failed",
        message: "sctp connectx",
    };
    pub const LISTEN: Operation = Operation {
        code: "spark.transport.sctp.listen_failed",
        message: "sctp listen",
    };
    pub const SEND: Operation = Operation {
        code: "spark.transport.sctp.send_failed",
        message: "sctp send",
    };
    pub const RECEIVE: Operation = Operation {
        code: "spark.transport.sctp.receive_failed",
        message: "sctp receive",
    };
    pub const GET_OPTION: Operation = Operation {
        code: "spark.transport.sctp.get_option_failed",
        message: "sctp getsockopt",
    };
    pub const SET_OPTION: Operation = Operation {
        code: "spark.transport.sctp.set_option_failed",
        message: "sctp setsockopt",
    };
    pub const ADDRESSES: Operation = Operation {
        code: "spark.transport.sctp.addresses_failed",
        message: "sctp getaddrs",
    };
    pub const PEELOFF: Operation = Operation {
        code: "spark.transport.sctp.peeloff_failed",
        message: "sctp peeloff",
    };
    pub const SHUTDOWN: Operation = Operation {
        code: "spark.transport.sctp.shutdown_failed",
        message: "sctp shutdown",
    };
    pub const CONFIGURE: Operation = Operation {
        code: "spark.transport.sctp.configure_failed",
        message: "sctp configure",
    };
    pub const CLOSE: Operation = Operation {
        code: "spark.transport.sctp.close_failed",
        message: "sctp close",
    };
}

const ARGUMENT_CODE: &str = "spark.transport.sctp.invalid_argument";
const CLOSED_CODE: &str = "spark.transport.sctp.closed";
const DECODE_CODE: &str = "spark.transport.sctp.decode_failed";
const UNSUPPORTED_CODE: &str = "spark.transport.sctp.unsupported_option";
const TOO_LARGE_CODE: &str = "spark.transport.sctp.message_too_large";
const RUNTIME_CODE: &str = "spark.transport.sctp.runtime";
const CONFIG_CODE: &str = "spark.transport.sctp.config";

/// crate 对外暴露的统一错误。
///
/// # 契约说明
/// - `Argument`：调用参数非法，**一定**在任何后端调用之前返回。
/// - `Transport`：后端调用失败，`errno` 原样透传，既不重试也不吞掉。
/// - 协议事件（关联断开、对端地址变化等）不是错误，而是作为通知消息投递。
#[derive(Debug, Error)]
pub enum SctpError {
    /// 调用参数不合法。
    #[error("invalid argument: {reason}")]
    Argument { reason: Cow<'static, str> },
    /// 后端系统调用失败。
    #[error("{} failed (errno {errno}): {source}", .op.message)]
    Transport {
        op: Operation,
        errno: i32,
        #[source]
        source: io::Error,
    },
    /// 通知缓冲区无法解码。
    #[error(transparent)]
    Decode(#[from] DecodeError),
    /// 端点已关闭，句柄不可再用。
    #[error("socket is closed")]
    Closed,
    /// 当前后端或能力描述不支持该选项。
    #[error("option {option:?} is not supported by the {backend} backend")]
    Unsupported {
        option: SctpOption,
        backend: &'static str,
    },
    /// 接收缓冲不足以容纳完整消息，且截断策略要求报错。
    #[error("message exceeds receive buffer of {capacity} bytes")]
    MessageTooLarge { capacity: usize },
    /// 进程级后端运行时状态异常。
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    /// 配置加载或校验失败。
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SctpError {
    /// 构造参数错误。
    pub fn argument(reason: impl Into<Cow<'static, str>>) -> Self {
        SctpError::Argument {
            reason: reason.into(),
        }
    }

    /// 把 `io::Error` 包装为带操作标识的传输错误。
    pub fn transport(op: Operation, source: io::Error) -> Self {
        let errno = source.raw_os_error().unwrap_or(0);
        SctpError::Transport { op, errno, source }
    }

    /// 由原生 errno 直接构造传输错误。
    pub fn from_errno(op: Operation, errno: i32) -> Self {
        SctpError::Transport {
            op,
            errno,
            source: io::Error::from_raw_os_error(errno),
        }
    }

    /// 返回稳定错误码，便于日志检索与告警聚合。
    pub fn code(&self) -> &'static str {
        match self {
            SctpError::Argument { .. } => ARGUMENT_CODE,
            SctpError::Transport { op, .. } => op.code,
            SctpError::Decode(_) => DECODE_CODE,
            SctpError::Closed => CLOSED_CODE,
            SctpError::Unsupported { .. } => UNSUPPORTED_CODE,
            SctpError::MessageTooLarge { .. } => TOO_LARGE_CODE,
            SctpError::Runtime(_) => RUNTIME_CODE,
            SctpError::Config(_) => CONFIG_CODE,
        }
    }

    /// 原生 errno；非传输错误返回 `None`。
    pub fn errno(&self) -> Option<i32> {
        match self {
            SctpError::Transport { errno, .. } => Some(*errno),
            _ => None,
        }
    }

    pub fn is_argument(&self) -> bool {
        matches!(self, SctpError::Argument { .. })
    }
}

/// 通知解码失败的原因。
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum DecodeError {
    /// 缓冲区连 8 字节通用头都不足。
    #[error("notification header needs {needed} bytes, got {actual}")]
    TruncatedHeader { needed: usize, actual: usize },
    /// 头部声明的长度超过实际读到的字节数。
    #[error("notification declares {declared} bytes but only {actual} were read")]
    LengthExceedsBuffer { declared: usize, actual: usize },
    /// 声明长度不足以覆盖该类型的固定部分。
    #[error("notification type {tag:#06x} needs {needed} bytes, declared {declared}")]
    FixedPartMissing {
        tag: u16,
        needed: usize,
        declared: usize,
    },
    /// 无法识别的通知类型。
    #[error("unsupported notification type {tag:#06x}")]
    UnsupportedType { tag: u16 },
    /// 通知未在一次接收中完整到达。
    #[error("notification was delivered partially ({received} bytes)")]
    Incomplete { received: usize },
}

/// 进程级运行时（usrsctp 全局栈）的状态错误。
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RuntimeError {
    /// 同一进程内重复初始化。
    #[error("{backend} runtime is already initialized in this process")]
    AlreadyInitialized { backend: &'static str },
    /// 原生初始化入口失败。
    #[error("{backend} runtime failed to initialize")]
    InitFailed { backend: &'static str },
}

pub type Result<T, E = SctpError> = std::result::Result<T, E>;
