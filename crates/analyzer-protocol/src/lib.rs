//! Analyzer Protocol - 公共类型定义
//!
//! 四个会话组件 (Publisher / Subscriber / Requester / Replyer) 共享的
//! 叶子类型：端点、主题消息、以及配置文件中约定的键名。

use serde::{Deserialize, Serialize};
use std::fmt;

/// ZeroMQ 端点地址
///
/// 不可变值类型，形如 `scheme://host:port`，例如 "tcp://127.0.0.1:5560"。
/// 地址变更时整体替换而不是原地修改，替换即触发组件重新绑定。
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(String);

impl Endpoint {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 判断是否需要重新绑定
    ///
    /// 仅当候选地址非空且与当前地址不同时返回 true。空地址表示
    /// "沿用当前地址"，不触发重绑。
    pub fn needs_rebind(&self, candidate: &str) -> bool {
        !candidate.is_empty() && candidate != self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Endpoint {
    fn from(address: &str) -> Self {
        Self(address.to_string())
    }
}

/// PUB/SUB 模式下收到的一条主题消息
///
/// topic 是订阅过滤用的前缀帧，payload 是其后的内容帧。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicMessage {
    pub topic: String,
    pub payload: String,
}

/// 配置文件中的约定键名
///
/// 各组件记住上次使用的地址，面板层记住最近发送的消息列表。
pub mod keys {
    pub const PUBLISHER_ADDRESS: &str = "publisher_address";
    pub const PUBLISHER_LAST_TOPIC: &str = "publisher_last_topic";
    pub const SUBSCRIBER_ADDRESS: &str = "subscriber_address";
    pub const SUBSCRIBER_LAST_TOPICS: &str = "subscriber_last_topics";
    pub const REQUESTER_ADDRESS: &str = "requester_address";
    pub const REPLYER_ADDRESS: &str = "replyer_address";

    pub const PUBLISHER_RECENT_MESSAGES: &str = "publisher_recent_messages";
    pub const REQUESTER_RECENT_MESSAGES: &str = "requester_recent_messages";
    pub const REPLYER_RECENT_MESSAGES: &str = "replyer_recent_messages";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rebind_only_on_non_empty_difference() {
        let endpoint = Endpoint::new("tcp://127.0.0.1:5555");

        assert!(!endpoint.needs_rebind(""));
        assert!(!endpoint.needs_rebind("tcp://127.0.0.1:5555"));
        assert!(endpoint.needs_rebind("tcp://127.0.0.1:5556"));

        // 初始为空地址时，任何非空地址都触发绑定
        let unset = Endpoint::default();
        assert!(unset.is_empty());
        assert!(unset.needs_rebind("tcp://127.0.0.1:5555"));
        assert!(!unset.needs_rebind(""));
    }

    #[test]
    fn endpoint_equality_is_by_string() {
        assert_eq!(
            Endpoint::new("tcp://localhost:4002"),
            Endpoint::from("tcp://localhost:4002")
        );
        assert_ne!(
            Endpoint::new("tcp://localhost:4002"),
            Endpoint::new("tcp://localhost:4003")
        );
    }

    #[test]
    fn topic_message_serializes_as_object() {
        let msg = TopicMessage {
            topic: "sensors/temp".to_string(),
            payload: "21.5".to_string(),
        };

        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"topic":"sensors/temp","payload":"21.5"}"#);

        let back: TopicMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }
}
