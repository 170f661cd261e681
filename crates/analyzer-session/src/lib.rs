//! Analyzer Session - 连接与会话管理核心
//!
//! 四个各自持有一个 ZeroMQ 端点的组件。socket 生命周期由组件独占
//! 管理，后台 I/O 在专用线程上运行，回调在后台线程触发，表现层
//! 负责把界面更新调度回自己的 UI 线程。

pub mod config;
pub mod error;
pub mod publisher;
pub mod replyer;
pub mod requester;
pub mod subscriber;

pub use config::{ConfigStore, MAX_RECENT_MESSAGES};
pub use error::{Result, SessionError};
pub use publisher::Publisher;
pub use replyer::Replyer;
pub use requester::Requester;
pub use subscriber::Subscriber;

pub use analyzer_protocol::{keys, Endpoint, TopicMessage};
