// 使用 thiserror 定义组件内部的错误类型
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to create {socket_type} socket: {source}")]
    SocketCreate {
        socket_type: &'static str,
        source: zmq::Error,
    },

    #[error("Failed to bind to {address}: {source}")]
    Bind { address: String, source: zmq::Error },

    #[error("Failed to connect to {address}: {source}")]
    Connect { address: String, source: zmq::Error },

    #[error("Failed to send on {address}: {source}")]
    Send { address: String, source: zmq::Error },

    #[error("Socket option error: {0}")]
    SocketOption(#[from] zmq::Error),

    #[error("No address configured")]
    NoAddress,

    #[error("Component is not running")]
    NotRunning,
}

pub type Result<T> = std::result::Result<T, SessionError>;
