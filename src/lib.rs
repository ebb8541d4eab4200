//! Core of a multi-device messaging client: a Noise-encrypted framed
//! WebSocket transport carrying a compact binary node format, a
//! request/response multiplexing dispatcher, and a MAC-chained app-state
//! sync engine.
//!
//! The host wires in the external collaborators (device store, E2EE layer,
//! media helper) through the traits in [`store::traits`] and consumes
//! [`types::events::Event`]s:
//!
//! ```no_run
//! use std::sync::Arc;
//! use wamd::client::{Client, ClientConfig};
//! use wamd::crypto::KeyPair;
//! use wamd::store::{Device, MemoryStore};
//! use wamd::types::events::Event;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let store = Arc::new(MemoryStore::new());
//! let device = Arc::new(Device::new(
//!     KeyPair::generate(),
//!     store.clone(),
//!     store.clone(),
//!     store,
//! ));
//! let client = Client::new(device, ClientConfig::default());
//! client
//!     .add_event_handler(Box::new(|event| {
//!         if let Event::Connected(_) = event {
//!             println!("connected");
//!         }
//!     }))
//!     .await;
//! client.connect().await?;
//! # Ok(())
//! # }
//! ```

pub mod appstate;
mod appstate_sync;
pub mod binary;
pub mod client;
pub mod crypto;
pub mod handshake;
mod keepalive;
pub mod mediaconn;
pub mod proto;
pub mod request;
pub mod socket;
pub mod store;
pub mod types;

pub use client::{Client, ClientConfig};
pub use types::events::Event;
pub use types::jid::Jid;
