//! # ari-adapter
//!
//! Remote Adapter sessions for ARI.
//!
//! This crate provides:
//! - Data provider session with per-item subscription ordering and pushes
//! - Metadata provider session with a default policy for unhandled verbs
//! - Init handshake, version negotiation and keepalive timer
//! - Proxy connector with optional TLS
//! - YAML and environment configuration

pub mod config;
pub mod connection;
pub mod data;
pub mod error;
pub mod keepalive;
pub mod metadata;
pub mod outbound;
pub mod response;
pub mod session;
pub mod stream;
pub mod tls;

pub use config::{Config, ConfigError, ProviderKind, SessionConfig};
pub use connection::{attach_data_provider, attach_metadata_provider, serve, Attached, InboundSession};
pub use data::{DataProvider, DataProviderBuilder};
pub use error::AdapterError;
pub use metadata::{MetadataProvider, MetadataProviderBuilder};
pub use outbound::{outbound, Outbound, StreamMode};
pub use response::Response;
pub use session::Phase;
