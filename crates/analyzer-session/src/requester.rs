//! Requester - REQ 套接字与异步等待
//!
//! 发送请求是同步的，等待应答交给一个分离的后台线程。REQ 的锁步
//! 约束决定了取消一个未应答的请求只能整个丢弃 socket 再重连，所以
//! 新请求到来时：先收回等待线程，再重建 socket。
//!
//! 等待线程按短超时轮询；请求方没有超时上限，未应答的请求会一直
//! 等到被新请求取代或组件销毁。

use crate::config::ConfigStore;
use crate::error::{Result, SessionError};
use analyzer_protocol::{keys, Endpoint};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info};

const SOCKET_TIMEOUT_MS: i32 = 100;

/// 收到应答时触发的回调，在等待线程上执行
pub type ReplyCallback = Box<dyn Fn(&[u8]) + Send + Sync + 'static>;

/// REQ 端请求组件
pub struct Requester {
    config: Arc<ConfigStore>,
    context: zmq::Context,
    endpoint: Mutex<Endpoint>,
    socket: Arc<Mutex<Option<zmq::Socket>>>,
    requesting: Arc<AtomicBool>,
    waiter: Mutex<Option<JoinHandle<()>>>,
    on_received: Arc<RwLock<Option<ReplyCallback>>>,
}

impl Requester {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        let endpoint = Endpoint::new(config.value(keys::REQUESTER_ADDRESS).unwrap_or_default());

        Self {
            config,
            context: zmq::Context::new(),
            endpoint: Mutex::new(endpoint),
            socket: Arc::new(Mutex::new(None)),
            requesting: Arc::new(AtomicBool::new(false)),
            waiter: Mutex::new(None),
            on_received: Arc::new(RwLock::new(None)),
        }
    }

    pub fn set_on_received(&self, callback: impl Fn(&[u8]) + Send + Sync + 'static) {
        *self.on_received.write().unwrap() = Some(Box::new(callback));
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.lock().unwrap().clone()
    }

    pub fn is_requesting(&self) -> bool {
        self.requesting.load(Ordering::SeqCst)
    }

    /// 发出一个单帧请求
    ///
    /// 前一个请求仍在途时先将其取消（孤立其等待线程并重建 socket），
    /// 新请求永远取代旧请求；被取代的请求不会再触发回调。
    /// 发送成功后派生等待线程，应答到达时触发 `on_received`。
    pub fn request(&self, payload: &[u8], address: &str) -> Result<()> {
        self.cancel_in_flight();

        let endpoint = {
            let mut endpoint = self.endpoint.lock().unwrap();
            if endpoint.needs_rebind(address) {
                *endpoint = Endpoint::new(address);
                self.config.set_value(keys::REQUESTER_ADDRESS, address);
                // 换地址必然换 socket
                *self.socket.lock().unwrap() = None;
            }
            if endpoint.is_empty() {
                return Err(SessionError::NoAddress);
            }
            endpoint.clone()
        };

        {
            let mut guard = self.socket.lock().unwrap();
            if guard.is_none() {
                *guard = Some(self.connect(&endpoint)?);
            }

            let socket = guard.as_ref().ok_or(SessionError::NotRunning)?;
            if let Err(source) = socket.send(payload, 0) {
                // REQ 发送失败后状态机已坏，丢弃 socket 以便下次重连
                *guard = None;
                return Err(SessionError::Send {
                    address: endpoint.to_string(),
                    source,
                });
            }
        }

        debug!("Sent {} byte request to {}", payload.len(), endpoint);
        self.requesting.store(true, Ordering::SeqCst);

        let socket = self.socket.clone();
        let requesting = self.requesting.clone();
        let on_received = self.on_received.clone();

        *self.waiter.lock().unwrap() = Some(thread::spawn(move || {
            wait_for_reply(&socket, &requesting, &on_received);
        }));

        Ok(())
    }

    /// 取消在途请求并收回等待线程
    ///
    /// 先清标志、join 线程，然后才碰 socket，保证新旧请求不会有两个
    /// 线程交叠在同一个 socket 状态上。
    fn cancel_in_flight(&self) {
        let was_in_flight = self.requesting.swap(false, Ordering::SeqCst);

        if let Some(handle) = self.waiter.lock().unwrap().take() {
            let _ = handle.join();
        }

        if was_in_flight {
            // 未应答的 REQ socket 无法复用，只能丢弃后重连
            debug!("Superseding an unanswered request, recreating socket");
            *self.socket.lock().unwrap() = None;
        }
    }

    fn connect(&self, endpoint: &Endpoint) -> Result<zmq::Socket> {
        let socket = self
            .context
            .socket(zmq::REQ)
            .map_err(|source| SessionError::SocketCreate {
                socket_type: "REQ",
                source,
            })?;
        socket.set_rcvtimeo(SOCKET_TIMEOUT_MS)?;
        socket.set_sndtimeo(SOCKET_TIMEOUT_MS)?;
        socket.set_linger(0)?;

        if let Err(source) = socket.connect(endpoint.as_str()) {
            error!("Failed to connect to {}: {}", endpoint, source);
            return Err(SessionError::Connect {
                address: endpoint.to_string(),
                source,
            });
        }

        info!("Requester connected to {}", endpoint);
        Ok(socket)
    }
}

impl Drop for Requester {
    fn drop(&mut self) {
        self.cancel_in_flight();
    }
}

/// 等待线程主体
///
/// requesting 标志是取消信号，每轮轮询检查一次；收到应答后清标志并
/// 触发回调。传输错误（包括并发取消关闭 socket 引起的）静默退出。
fn wait_for_reply(
    socket: &Mutex<Option<zmq::Socket>>,
    requesting: &AtomicBool,
    on_received: &RwLock<Option<ReplyCallback>>,
) {
    while requesting.load(Ordering::SeqCst) {
        let reply = {
            let guard = socket.lock().unwrap();
            let Some(sock) = guard.as_ref() else {
                break;
            };

            match sock.recv_bytes(0) {
                Ok(reply) => Some(reply),
                Err(zmq::Error::EAGAIN) => None,
                Err(e) => {
                    // 出错即不再在途，标志必须清掉，否则 is_requesting
                    // 会一直报告在途直到下一次 request
                    if requesting.swap(false, Ordering::SeqCst) {
                        debug!("Requester wait aborted: {}", e);
                    }
                    break;
                }
            }
        };

        if let Some(reply) = reply {
            // 与取消方用 swap 决出先后：标志已被清掉说明本请求已被
            // 取代，这个应答属于孤立的请求，丢弃而不回调
            if !requesting.swap(false, Ordering::SeqCst) {
                break;
            }
            if let Some(callback) = on_received.read().unwrap().as_ref() {
                callback(&reply);
            }
            break;
        }
    }
}
