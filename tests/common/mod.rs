//! Shared integration test infrastructure

#![allow(dead_code)]

use std::net::SocketAddr;
use tsubame_uploadr::config::{
    ClientConfig, Config, LoggingConfig, MetricsConfig, ServerConfig, StorageConfig,
};
use tsubame_uploadr::server::Server;

pub const TEST_BUCKET: &str = "test-bucket";
pub const TEST_ACCESS_KEY: &str = "minioadmin";
pub const TEST_SECRET_KEY: &str = "minioadmin";

/// Storage settings pointing at an S3-compatible endpoint
pub fn storage_config(endpoint: &str) -> StorageConfig {
    StorageConfig {
        bucket: Some(TEST_BUCKET.into()),
        region: "us-east-1".into(),
        endpoint: Some(endpoint.into()),
        access_key: Some(TEST_ACCESS_KEY.into()),
        secret_key: Some(TEST_SECRET_KEY.into()),
    }
}

pub fn test_config(storage: StorageConfig) -> Config {
    Config {
        server: ServerConfig {
            address: "127.0.0.1:0".into(),
        },
        storage,
        client: ClientConfig::default(),
        metrics: MetricsConfig::default(),
        logging: LoggingConfig::default(),
    }
}

/// Issuance server running on an ephemeral port
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    pub async fn start(config: Config) -> Self {
        let server = Server::new(config).await.expect("Failed to create server");
        let addr = server.local_addr();
        let handle = tokio::spawn(async move {
            let _ = server.run().await;
        });

        Self {
            addr,
            client: reqwest::Client::new(),
            handle,
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub async fn presign(&self, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url("/api/get-presigned-url"))
            .json(&body)
            .send()
            .await
            .expect("Request failed")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
