//! Publisher - PUB 套接字管理
//!
//! 持有唯一的 PUB socket，绑定端口对外发布。没有后台线程：
//! 发布是即发即弃的同步操作，用一把互斥锁串行化并发调用方。

use crate::config::ConfigStore;
use analyzer_protocol::{keys, Endpoint};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const SOCKET_TIMEOUT_MS: i32 = 100;
// 绑定后稍作等待，让慢加入的订阅方完成连接
const BINDING_DELAY: Duration = Duration::from_millis(200);

struct Inner {
    endpoint: Endpoint,
    socket: Option<zmq::Socket>,
}

/// PUB 端发布组件
///
/// 每个进程一个实例，由启动代码构造后共享给表现层。
pub struct Publisher {
    config: Arc<ConfigStore>,
    context: zmq::Context,
    inner: Mutex<Inner>,
}

impl Publisher {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        let endpoint = Endpoint::new(config.value(keys::PUBLISHER_ADDRESS).unwrap_or_default());

        Self {
            config,
            context: zmq::Context::new(),
            inner: Mutex::new(Inner {
                endpoint,
                socket: None,
            }),
        }
    }

    /// 当前绑定地址
    pub fn endpoint(&self) -> Endpoint {
        self.inner.lock().unwrap().endpoint.clone()
    }

    /// 发布一条两帧消息（topic 帧 + payload 帧）
    ///
    /// 先按需重绑到 `address`，随后发送。PUB/SUB 是尽力而为的模式：
    /// 绑定失败或发送失败只记录日志，下一次调用会重试绑定。
    pub fn queue_message(&self, address: &str, topic: &str, payload: &str) {
        let mut inner = self.inner.lock().unwrap();
        self.connect_locked(&mut inner, address);

        let Some(socket) = inner.socket.as_ref() else {
            debug!("Publisher has no bound socket, dropping message");
            return;
        };

        let send_result = socket
            .send(topic.as_bytes(), zmq::SNDMORE)
            .and_then(|_| socket.send(payload.as_bytes(), 0));

        if let Err(e) = send_result {
            warn!("Failed to publish on topic {}: {}", topic, e);
            // 发送失败视为 socket 已坏，丢弃并在下次调用时重建
            inner.socket = None;
        } else {
            debug!("Published {} bytes on topic {}", payload.len(), topic);
        }
    }

    /// 按需重绑。锁由调用方持有。
    fn connect_locked(&self, inner: &mut Inner, address: &str) {
        if inner.endpoint.needs_rebind(address) {
            // 先关闭旧 socket 再替换地址
            inner.socket = None;
            inner.endpoint = Endpoint::new(address);
            self.config.set_value(keys::PUBLISHER_ADDRESS, address);
        }

        if inner.socket.is_some() || inner.endpoint.is_empty() {
            return;
        }

        match self.bind(&inner.endpoint) {
            Ok(socket) => {
                info!("✅ Publisher bound to {}", inner.endpoint);
                // 等待订阅方跟上，避免首条消息落入慢加入窗口
                thread::sleep(BINDING_DELAY);
                inner.socket = Some(socket);
            }
            Err(e) => {
                error!("Failed to bind to {}: {}", inner.endpoint, e);
            }
        }
    }

    fn bind(&self, endpoint: &Endpoint) -> zmq::Result<zmq::Socket> {
        let socket = self.context.socket(zmq::PUB)?;
        socket.set_rcvtimeo(SOCKET_TIMEOUT_MS)?;
        socket.set_sndtimeo(SOCKET_TIMEOUT_MS)?;
        socket.bind(endpoint.as_str())?;
        Ok(socket)
    }
}
