//! Tsubame Uploadr Library
//!
//! Direct-to-storage uploads: a small server issues short-lived pre-signed
//! PUT URLs, and a client-side controller streams files straight to the
//! object store with progress, pause/resume, retry and cancel.
//!
//! # Features
//!
//! - **Scoped URLs**: Each URL authorizes one fresh object key and one content type
//! - **Validation**: Size limit and MIME/extension whitelist on both sides
//! - **Resumable UI**: Pause, resume, retry and cancel per file
//! - **S3 Compatible**: AWS S3 or any endpoint speaking the S3 presign scheme
//!
//! # Example
//!
//! ```no_run
//! use tsubame_uploadr::{config::Config, server::Server};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let server = Server::new(config).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod issuance;
pub mod metrics;
pub mod s3;
pub mod server;
pub mod validation;

// Re-export commonly used types
pub use client::UploadController;
pub use config::Config;
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
