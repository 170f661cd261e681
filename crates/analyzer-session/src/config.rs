//! Configuration Store - 配置持久化
//!
//! JSON 文件形式的键值存储，记录各组件上次使用的地址和最近发送的
//! 消息列表。每次修改整体重写文件（与面板层共享，单写入方约定）。
//!
//! 读取失败降级为空配置并告警，写入失败只记录日志，绝不向组件层
//! 传播错误。

use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

/// 最近消息列表的默认上限
pub const MAX_RECENT_MESSAGES: usize = 25;

/// JSON 键值配置存储
///
/// 线程安全：内部 Mutex 保护整张表，所有组件共享一个 `Arc<ConfigStore>`。
pub struct ConfigStore {
    path: PathBuf,
    entries: Mutex<Map<String, Value>>,
}

impl ConfigStore {
    /// 打开指定路径的配置文件
    ///
    /// 文件不存在或解析失败时从空配置开始。
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<Map<String, Value>>(&text) {
                Ok(map) => {
                    debug!("Config loaded from {}", path.display());
                    map
                }
                Err(e) => {
                    warn!("Could not parse config file {}: {}", path.display(), e);
                    Map::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => {
                warn!("Could not read config file {}: {}", path.display(), e);
                Map::new()
            }
        };

        Self {
            path,
            entries: Mutex::new(entries),
        }
    }

    /// 默认配置文件路径：`<user config dir>/zmq-analyzer/config.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("zmq-analyzer")
            .join("config.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取字符串值，键不存在或类型不符返回 None
    pub fn value(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap();
        entries.get(key).and_then(|v| v.as_str()).map(String::from)
    }

    pub fn set_value(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), Value::String(value.to_string()));
        self.save(&entries);
    }

    /// 读取字符串列表，非列表或不存在时返回空
    pub fn list(&self, key: &str) -> Vec<String> {
        let entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(String::from)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// 向"最近使用"列表头部插入一条记录
    ///
    /// 已存在的值移动到头部（去重），超过 `max_len` 时从尾部淘汰。
    pub fn push_recent(&self, key: &str, value: &str, max_len: usize) {
        let mut entries = self.entries.lock().unwrap();
        let mut items: Vec<String> = match entries.get(key) {
            Some(Value::Array(existing)) => existing
                .iter()
                .filter_map(|v| v.as_str())
                .map(String::from)
                .collect(),
            _ => Vec::new(),
        };

        items.retain(|item| item != value);
        items.insert(0, value.to_string());
        items.truncate(max_len);

        entries.insert(
            key.to_string(),
            Value::Array(items.into_iter().map(Value::String).collect()),
        );
        self.save(&entries);
    }

    pub fn remove_from_list(&self, key: &str, value: &str) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(Value::Array(items)) = entries.get_mut(key) {
            items.retain(|item| item.as_str() != Some(value));
            self.save(&entries);
        }
    }

    fn save(&self, entries: &Map<String, Value>) {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = fs::create_dir_all(parent) {
                    warn!("Could not create config directory {}: {}", parent.display(), e);
                    return;
                }
            }
        }

        match serde_json::to_string_pretty(&Value::Object(entries.clone())) {
            Ok(text) => {
                if let Err(e) = fs::write(&self.path, text) {
                    warn!("Could not write config file {}: {}", self.path.display(), e);
                }
            }
            Err(e) => warn!("Could not serialize config: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn store_in(dir: &tempfile::TempDir) -> ConfigStore {
        ConfigStore::open(dir.path().join("config.json"))
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        assert_eq!(store.value("publisher_address"), None);
        assert!(store.list("requester_recent_messages").is_empty());
    }

    #[test]
    fn values_round_trip_through_the_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        {
            let store = ConfigStore::open(&path);
            store.set_value("replyer_address", "tcp://*:5560");
        }

        let reopened = ConfigStore::open(&path);
        assert_eq!(
            reopened.value("replyer_address").as_deref(),
            Some("tcp://*:5560")
        );
    }

    #[test]
    fn push_recent_keeps_three_most_recent_newest_first() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        for msg in ["a", "b", "c", "d"] {
            store.push_recent("requester_recent_messages", msg, 3);
        }

        assert_eq!(store.list("requester_recent_messages"), ["d", "c", "b"]);
    }

    #[test]
    fn push_recent_deduplicates_by_moving_to_front() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store.push_recent("publisher_recent_messages", "first", MAX_RECENT_MESSAGES);
        store.push_recent("publisher_recent_messages", "second", MAX_RECENT_MESSAGES);
        store.push_recent("publisher_recent_messages", "first", MAX_RECENT_MESSAGES);

        assert_eq!(store.list("publisher_recent_messages"), ["first", "second"]);
    }

    #[test]
    fn remove_from_list_deletes_the_value() {
        let dir = tempdir().unwrap();
        let store = store_in(&dir);

        store.push_recent("replyer_recent_messages", "keep", MAX_RECENT_MESSAGES);
        store.push_recent("replyer_recent_messages", "drop", MAX_RECENT_MESSAGES);
        store.remove_from_list("replyer_recent_messages", "drop");

        assert_eq!(store.list("replyer_recent_messages"), ["keep"]);
    }

    #[test]
    fn corrupt_file_degrades_to_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();

        let store = ConfigStore::open(&path);
        assert_eq!(store.value("anything"), None);

        // 仍可正常写入
        store.set_value("subscriber_address", "tcp://127.0.0.1:4002");
        assert_eq!(
            store.value("subscriber_address").as_deref(),
            Some("tcp://127.0.0.1:4002")
        );
    }
}
