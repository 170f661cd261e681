//! Replyer - REP 套接字与锁步应答循环
//!
//! 绑定端口等待请求。每接受一个请求就回调表现层，然后阻塞到
//! `send_reply` 提供应答内容为止，严格遵守 REP 的锁步约束：
//!
//! ```text
//! Idle ──start()──▶ WaitingForRequest ──recv──▶ AwaitingReplyPayload
//!                         ▲                              │ send_reply()
//!                         └────────── SendingReply ◀─────┘
//! ```
//!
//! 等待应答的握手用容量为 1 的有界 channel 实现，`stop()` 丢弃发送端
//! 即可唤醒并终止一个正在等待应答的循环。

use crate::config::ConfigStore;
use crate::error::{Result, SessionError};
use analyzer_protocol::{keys, Endpoint};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const SOCKET_TIMEOUT_MS: i32 = 100;
const REPLY_WAIT_INTERVAL: Duration = Duration::from_millis(100);

/// 收到请求时触发的回调，在应答循环线程上执行
pub type RequestCallback = Box<dyn Fn(&[u8]) + Send + Sync + 'static>;

/// REP 端应答组件
pub struct Replyer {
    config: Arc<ConfigStore>,
    context: zmq::Context,
    endpoint: Mutex<Endpoint>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    reply_tx: Mutex<Option<SyncSender<Vec<u8>>>>,
    on_received: Arc<RwLock<Option<RequestCallback>>>,
}

impl Replyer {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        let endpoint = Endpoint::new(config.value(keys::REPLYER_ADDRESS).unwrap_or_default());

        Self {
            config,
            context: zmq::Context::new(),
            endpoint: Mutex::new(endpoint),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            reply_tx: Mutex::new(None),
            on_received: Arc::new(RwLock::new(None)),
        }
    }

    pub fn set_on_received(&self, callback: impl Fn(&[u8]) + Send + Sync + 'static) {
        *self.on_received.write().unwrap() = Some(Box::new(callback));
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.lock().unwrap().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 绑定地址并启动应答循环
    ///
    /// 换地址时先停止旧循环；同地址已在运行则为空操作（不会二次绑定，
    /// 也不会产生第二个循环）。绑定在循环线程内进行，失败只记录日志，
    /// 组件保持停止状态直到用户用有效地址重试。
    pub fn start(&self, address: &str) -> Result<()> {
        {
            let mut endpoint = self.endpoint.lock().unwrap();
            if endpoint.needs_rebind(address) {
                *endpoint = Endpoint::new(address);
                self.config.set_value(keys::REPLYER_ADDRESS, address);
            } else if self.is_running() {
                debug!("Replyer already running on {}", endpoint);
                return Ok(());
            }

            if endpoint.is_empty() {
                return Err(SessionError::NoAddress);
            }
        }

        // 清理上一轮循环（重绑，或先前绑定失败的残留线程）
        self.stop();

        let (tx, rx) = sync_channel::<Vec<u8>>(1);
        *self.reply_tx.lock().unwrap() = Some(tx);
        self.running.store(true, Ordering::SeqCst);

        let context = self.context.clone();
        let endpoint = self.endpoint.lock().unwrap().clone();
        let running = self.running.clone();
        let on_received = self.on_received.clone();

        *self.worker.lock().unwrap() = Some(thread::spawn(move || {
            accept_loop(&context, &endpoint, &rx, &running, &on_received);
        }));

        Ok(())
    }

    /// 提供当前未答请求的应答内容
    ///
    /// 可从任意线程调用，也可以在请求到达很久之后调用，这一侧没有
    /// 超时。组件未运行时返回错误。
    pub fn send_reply(&self, payload: &[u8]) -> Result<()> {
        let guard = self.reply_tx.lock().unwrap();
        let tx = guard.as_ref().ok_or(SessionError::NotRunning)?;

        match tx.try_send(payload.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("A reply is already pending, dropping this one");
                Ok(())
            }
            Err(TrySendError::Disconnected(_)) => Err(SessionError::NotRunning),
        }
    }

    /// 停止应答循环，join 线程后关闭 socket
    ///
    /// 正阻塞等待应答内容的循环会被唤醒并直接退出、不再发送，对端的
    /// REQ socket 将观察到超时，请求方必须容忍这一点。
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        // 丢弃发送端，唤醒等待应答内容的循环
        self.reply_tx.lock().unwrap().take();

        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Replyer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 应答循环：接收请求、回调、等待应答、发送
///
/// socket 在本线程内创建和销毁，绝不跨线程共享。
fn accept_loop(
    context: &zmq::Context,
    endpoint: &Endpoint,
    reply_rx: &Receiver<Vec<u8>>,
    running: &AtomicBool,
    on_received: &RwLock<Option<RequestCallback>>,
) {
    let socket = match bind(context, endpoint) {
        Ok(socket) => socket,
        Err(e) => {
            error!("Failed to bind to {}: {}", endpoint, e);
            running.store(false, Ordering::SeqCst);
            return;
        }
    };

    info!("✅ Replyer bound to {}", endpoint);

    while running.load(Ordering::SeqCst) {
        let request = match socket.recv_bytes(0) {
            Ok(request) => request,
            Err(zmq::Error::EAGAIN) => continue,
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    warn!("Replyer receive error: {}", e);
                }
                continue;
            }
        };

        debug!("Received {} byte request", request.len());
        if let Some(callback) = on_received.read().unwrap().as_ref() {
            callback(&request);
        }

        // 等待表现层提供应答，时间上没有上限，但 stop() 可随时打断
        let reply = loop {
            if !running.load(Ordering::SeqCst) {
                debug!("Stopping before a reply was supplied");
                return;
            }
            match reply_rx.recv_timeout(REPLY_WAIT_INTERVAL) {
                Ok(payload) => break payload,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        };

        if let Err(e) = socket.send(&reply, 0) {
            warn!("Failed to send reply: {}", e);
        }
    }

    debug!("Replyer accept loop exited");
}

fn bind(context: &zmq::Context, endpoint: &Endpoint) -> Result<zmq::Socket> {
    let socket = context
        .socket(zmq::REP)
        .map_err(|source| SessionError::SocketCreate {
            socket_type: "REP",
            source,
        })?;
    socket.set_rcvtimeo(SOCKET_TIMEOUT_MS)?;
    socket.set_sndtimeo(SOCKET_TIMEOUT_MS)?;

    socket
        .bind(endpoint.as_str())
        .map_err(|source| SessionError::Bind {
            address: endpoint.to_string(),
            source,
        })?;

    Ok(socket)
}
