#![expect(clippy::unwrap_used)]

use std::net::SocketAddr;

use aureon_internal::config::Config;
use aureon_internal::gateway_util::{start_gateway, ShutdownHandle};
use reqwest::Client;

/// A gateway on an ephemeral port, shut down when dropped
pub struct TestGateway {
    pub addr: SocketAddr,
    pub client: Client,
    _shutdown: ShutdownHandle,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }
}

pub async fn start_test_gateway(config_toml: &str) -> TestGateway {
    let config = Config::load_from_toml(config_toml).unwrap();
    let (addr, shutdown) = start_gateway(config).await.unwrap();
    TestGateway {
        addr,
        client: Client::new(),
        _shutdown: shutdown,
    }
}
