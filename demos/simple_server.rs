use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::select;
use tokio::sync::mpsc;
use tracing::{info, Level};

use raknet_server::protocol::reliability::Reliability;
use raknet_server::server::config::RakNetConfig;
use raknet_server::server::end_point::RakNetServer;
use raknet_server::server::event_handler::ServerEventHandler;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        // .with_max_level(Level::DEBUG)
        // .with_max_level(Level::TRACE)
        .with_thread_ids(true)
        .try_init()
        .ok();
}

/// Answers pings with a Bedrock style MOTD and echoes every payload back to its sender
struct EchoHandler {
    echo: mpsc::Sender<(SocketAddr, Bytes)>,
}

#[async_trait]
impl ServerEventHandler for EchoHandler {
    fn ping_response(&self) -> Bytes {
        Bytes::from_static(b"MCPE;Echo Server;712;1.21.20;0;10;0;Echo;Survival;1;19132;19133;")
    }

    fn is_permitted(&self, _addr: SocketAddr) -> bool {
        true
    }

    fn on_initialized(&self, server_guid: i64) {
        info!("server guid is {}", server_guid);
    }

    async fn on_connected(&self, addr: SocketAddr) {
        info!("{:?} connected", addr);
    }

    async fn on_disconnected(&self, addr: SocketAddr) {
        info!("{:?} disconnected", addr);
    }

    async fn on_message(&self, addr: SocketAddr, payload: Bytes) {
        info!("{} bytes from {:?}", payload.len(), addr);
        let _ = self.echo.send((addr, payload)).await;
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    init_logging();

    let (echo_send, mut echo_recv) = mpsc::channel(64);
    let config = Arc::new(RakNetConfig::new("0.0.0.0:19132".parse()?));
    let server = RakNetServer::bind(config, Arc::new(EchoHandler { echo: echo_send })).await?;

    let echo_loop = async {
        while let Some((addr, payload)) = echo_recv.recv().await {
            if let Err(e) = server.send(addr, payload, Reliability::ReliableOrdered).await {
                info!("could not echo to {:?}: {}", addr, e);
            }
        }
    };

    select! {
        _ = server.run() => {}
        _ = echo_loop => {}
    }
    Ok(())
}
