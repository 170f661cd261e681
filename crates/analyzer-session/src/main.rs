//! zmq-analyzer - 控制台前端
//!
//! 会话核心的一个最小表现层：选定一个角色，把 stdin/stdout 当作
//! 界面。图形面板层消费的是同一套组件 API。

use analyzer_session::{
    keys, ConfigStore, Publisher, Replyer, Requester, Subscriber, MAX_RECENT_MESSAGES,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "zmq-analyzer")]
#[command(about = "Console inspector for ZeroMQ messaging patterns", long_about = None)]
struct Cli {
    /// 配置文件路径，默认在用户配置目录下
    #[arg(long, value_name = "FILE")]
    config_file: Option<PathBuf>,

    #[command(subcommand)]
    role: Role,
}

#[derive(Subcommand)]
enum Role {
    /// Bind a PUB socket and publish each stdin line
    Publish {
        /// Bind address, e.g. tcp://*:4002 (defaults to the last used one)
        #[arg(long)]
        address: Option<String>,
        #[arg(long, default_value = "")]
        topic: String,
    },
    /// Connect a SUB socket and print incoming messages
    Subscribe {
        /// Connect address, e.g. tcp://127.0.0.1:4002
        #[arg(long)]
        address: Option<String>,
        /// Topic filter, repeatable; none means all topics
        #[arg(long)]
        topic: Vec<String>,
    },
    /// Send each stdin line as a request and print the reply
    Request {
        #[arg(long)]
        address: Option<String>,
    },
    /// Bind a REP socket; each request is printed and answered with the next stdin line
    Reply {
        #[arg(long)]
        address: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let config = Arc::new(ConfigStore::open(
        cli.config_file.unwrap_or_else(ConfigStore::default_path),
    ));
    info!("Using config file {}", config.path().display());

    match cli.role {
        Role::Publish { address, topic } => run_publisher(config, address, topic),
        Role::Subscribe { address, topic } => run_subscriber(config, address, topic),
        Role::Request { address } => run_requester(config, address),
        Role::Reply { address } => run_replyer(config, address),
    }
}

/// 命令行地址优先，否则回落到配置里上次使用的地址
fn resolve_address(config: &ConfigStore, address: Option<String>, key: &str) -> Result<String> {
    address
        .or_else(|| config.value(key))
        .filter(|a| !a.is_empty())
        .with_context(|| format!("no address given and none stored under '{key}'"))
}

fn run_publisher(config: Arc<ConfigStore>, address: Option<String>, topic: String) -> Result<()> {
    let address = resolve_address(&config, address, keys::PUBLISHER_ADDRESS)?;
    let publisher = Publisher::new(config.clone());
    config.set_value(keys::PUBLISHER_LAST_TOPIC, &topic);

    println!("Publishing on {address} (topic '{topic}'). One message per line:");
    for line in io::stdin().lock().lines() {
        let line = line?;
        publisher.queue_message(&address, &topic, &line);
        config.push_recent(keys::PUBLISHER_RECENT_MESSAGES, &line, MAX_RECENT_MESSAGES);
    }
    Ok(())
}

fn run_subscriber(config: Arc<ConfigStore>, address: Option<String>, topics: Vec<String>) -> Result<()> {
    let address = resolve_address(&config, address, keys::SUBSCRIBER_ADDRESS)?;
    let subscriber = Subscriber::new(config.clone());
    config.set_value(keys::SUBSCRIBER_LAST_TOPICS, &topics.join(","));

    subscriber.set_on_message(|message| {
        println!("[{}] {}", message.topic, message.payload);
    });
    subscriber.start(&topics, &address)?;

    println!("Listening on {address}. Press Enter to stop.");
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    subscriber.stop();
    Ok(())
}

fn run_requester(config: Arc<ConfigStore>, address: Option<String>) -> Result<()> {
    let address = resolve_address(&config, address, keys::REQUESTER_ADDRESS)?;
    let requester = Requester::new(config.clone());

    requester.set_on_received(|reply| {
        println!("<- {}", String::from_utf8_lossy(reply));
        print!("-> ");
        let _ = io::stdout().flush();
    });

    println!("Requesting from {address}. One request per line:");
    print!("-> ");
    io::stdout().flush()?;
    for line in io::stdin().lock().lines() {
        let line = line?;
        requester.request(line.as_bytes(), &address)?;
        config.push_recent(keys::REQUESTER_RECENT_MESSAGES, &line, MAX_RECENT_MESSAGES);
    }
    Ok(())
}

fn run_replyer(config: Arc<ConfigStore>, address: Option<String>) -> Result<()> {
    let address = resolve_address(&config, address, keys::REPLYER_ADDRESS)?;
    let replyer = Replyer::new(config.clone());

    replyer.set_on_received(|request| {
        println!("<- {}", String::from_utf8_lossy(request));
        print!("reply> ");
        let _ = io::stdout().flush();
    });
    replyer.start(&address)?;

    println!("Replying on {address}. Type a reply after each request:");
    for line in io::stdin().lock().lines() {
        let line = line?;
        replyer.send_reply(line.as_bytes())?;
        config.push_recent(keys::REPLYER_RECENT_MESSAGES, &line, MAX_RECENT_MESSAGES);
    }
    replyer.stop();
    Ok(())
}
