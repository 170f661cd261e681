//! Subscriber - SUB 套接字与后台轮询
//!
//! 连接到发布端，按主题过滤接收两帧消息。后台线程以短超时轮询，
//! 把每个主题的最新消息写入缓存，并回调表现层。
//!
//! ZeroMQ 的主题过滤是叠加式的，无法做增量差集，所以每次 `start`
//! 都整体重启订阅循环、重新建立全部过滤器。

use crate::config::ConfigStore;
use crate::error::{Result, SessionError};
use analyzer_protocol::{keys, Endpoint, TopicMessage};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

const SOCKET_TIMEOUT_MS: i32 = 100;

/// 表现层注册的消息回调，在后台线程上触发
pub type MessageCallback = Box<dyn Fn(TopicMessage) + Send + Sync + 'static>;

/// SUB 端订阅组件
pub struct Subscriber {
    config: Arc<ConfigStore>,
    context: zmq::Context,
    endpoint: Mutex<Endpoint>,
    socket: Arc<Mutex<Option<zmq::Socket>>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cache: Arc<RwLock<HashMap<String, String>>>,
    on_message: Arc<RwLock<Option<MessageCallback>>>,
}

impl Subscriber {
    pub fn new(config: Arc<ConfigStore>) -> Self {
        let endpoint = Endpoint::new(config.value(keys::SUBSCRIBER_ADDRESS).unwrap_or_default());

        Self {
            config,
            context: zmq::Context::new(),
            endpoint: Mutex::new(endpoint),
            socket: Arc::new(Mutex::new(None)),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
            cache: Arc::new(RwLock::new(HashMap::new())),
            on_message: Arc::new(RwLock::new(None)),
        }
    }

    pub fn set_on_message(&self, callback: impl Fn(TopicMessage) + Send + Sync + 'static) {
        *self.on_message.write().unwrap() = Some(Box::new(callback));
    }

    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.lock().unwrap().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 连接并订阅主题，启动后台轮询线程
    ///
    /// `topics` 为空时订阅全部主题（空过滤器）。已在运行时先整体停止，
    /// 重启即重建所有订阅。
    pub fn start(&self, topics: &[String], address: &str) -> Result<()> {
        self.stop();

        let endpoint = {
            let mut endpoint = self.endpoint.lock().unwrap();
            if endpoint.needs_rebind(address) {
                *endpoint = Endpoint::new(address);
                self.config.set_value(keys::SUBSCRIBER_ADDRESS, address);
            }
            if endpoint.is_empty() {
                return Err(SessionError::NoAddress);
            }
            endpoint.clone()
        };

        let socket = self
            .context
            .socket(zmq::SUB)
            .map_err(|source| SessionError::SocketCreate {
                socket_type: "SUB",
                source,
            })?;
        socket.set_rcvtimeo(SOCKET_TIMEOUT_MS)?;

        if let Err(source) = socket.connect(endpoint.as_str()) {
            error!("Failed to connect to {}: {}", endpoint, source);
            return Err(SessionError::Connect {
                address: endpoint.to_string(),
                source,
            });
        }

        if topics.is_empty() {
            socket.set_subscribe(b"")?;
        } else {
            for topic in topics {
                socket.set_subscribe(topic.as_bytes())?;
            }
        }

        info!("📡 Subscriber connected to {} ({} topic filter(s))", endpoint, topics.len().max(1));

        *self.socket.lock().unwrap() = Some(socket);
        self.running.store(true, Ordering::SeqCst);

        let socket = self.socket.clone();
        let running = self.running.clone();
        let cache = self.cache.clone();
        let on_message = self.on_message.clone();

        *self.worker.lock().unwrap() = Some(thread::spawn(move || {
            poll_loop(&socket, &running, &cache, &on_message);
        }));

        Ok(())
    }

    /// 停止轮询线程并关闭 socket
    ///
    /// 等待线程退出后，对缓存中出现过的主题尽力退订，再释放 socket。
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.worker.lock().unwrap().take() {
            let _ = handle.join();
        }

        let mut guard = self.socket.lock().unwrap();
        if let Some(socket) = guard.take() {
            for topic in self.cache.read().unwrap().keys() {
                let _ = socket.set_unsubscribe(topic.as_bytes());
            }
            debug!("Subscriber socket closed");
        }
    }

    /// 查询某主题缓存的最新消息，从未收到过时返回 None
    pub fn latest_message(&self, topic: &str) -> Option<String> {
        self.cache.read().unwrap().get(topic).cloned()
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        self.stop();
    }
}

/// 后台轮询循环
///
/// 每次迭代以短超时锁定并接收，超时属于正常情况；其他传输错误记录
/// 日志后继续，只有 running 标志被清除或 socket 被并发关闭才退出。
fn poll_loop(
    socket: &Mutex<Option<zmq::Socket>>,
    running: &AtomicBool,
    cache: &RwLock<HashMap<String, String>>,
    on_message: &RwLock<Option<MessageCallback>>,
) {
    while running.load(Ordering::SeqCst) {
        let received = {
            let guard = socket.lock().unwrap();
            let Some(sock) = guard.as_ref() else {
                break;
            };

            match sock.recv_bytes(0) {
                Ok(topic_frame) => {
                    if sock.get_rcvmore().unwrap_or(false) {
                        match sock.recv_bytes(0) {
                            Ok(payload_frame) => Some((topic_frame, payload_frame)),
                            Err(e) => {
                                warn!("Failed to receive payload frame: {}", e);
                                None
                            }
                        }
                    } else {
                        warn!("Discarding single-part message (expected topic + payload)");
                        None
                    }
                }
                Err(zmq::Error::EAGAIN) => None,
                Err(e) => {
                    if running.load(Ordering::SeqCst) {
                        warn!("Subscriber receive error: {}", e);
                    }
                    None
                }
            }
        };

        let Some((topic_frame, payload_frame)) = received else {
            continue;
        };

        let message = TopicMessage {
            topic: String::from_utf8_lossy(&topic_frame).into_owned(),
            payload: String::from_utf8_lossy(&payload_frame).into_owned(),
        };

        cache
            .write()
            .unwrap()
            .insert(message.topic.clone(), message.payload.clone());

        if let Some(callback) = on_message.read().unwrap().as_ref() {
            callback(message);
        }
    }

    debug!("Subscriber polling loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn unknown_topic_has_no_cached_message() {
        let dir = tempdir().unwrap();
        let config = Arc::new(ConfigStore::open(dir.path().join("config.json")));
        let subscriber = Subscriber::new(config);

        assert_eq!(subscriber.latest_message("never-seen"), None);
    }

    #[test]
    fn start_without_address_is_rejected() {
        let dir = tempdir().unwrap();
        let config = Arc::new(ConfigStore::open(dir.path().join("config.json")));
        let subscriber = Subscriber::new(config);

        let result = subscriber.start(&[], "");
        assert!(matches!(result, Err(SessionError::NoAddress)));
        assert!(!subscriber.is_running());
    }

    #[test]
    fn stop_without_start_is_harmless() {
        let dir = tempdir().unwrap();
        let config = Arc::new(ConfigStore::open(dir.path().join("config.json")));
        let subscriber = Subscriber::new(config);

        subscriber.stop();
        subscriber.stop();
        assert!(!subscriber.is_running());
    }
}
