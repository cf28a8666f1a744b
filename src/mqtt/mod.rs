//! # Broker Gateway
//!
//! One connection to the publish/subscribe broker, shared by both endpoints.
//! The gateway offers connect, publish, disconnect, and delivers every inbound
//! message to a handler supplied at construction.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Connection options derived from Settings
//! ├── message_manager.rs  - Inbound Message, outbound Payload, parse fallback
//! └── mqtt_handler.rs     - ConnectionState, Broker trait, MqttGateway
//! ```
//!
//! ## Delivery Contract
//!
//! - The network loop runs on its own tokio task; the handler is invoked from
//!   there, once per message, in arrival order per topic.
//! - Payloads that are not valid JSON are still delivered, wrapped as
//!   `{"raw": "<text>"}`.
//! - Publishing while not connected fails immediately. Nothing is queued.
//! - Reconnection is the owner's job. Subscriptions are re-issued on every
//!   successful connect.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;

pub use config::GatewayConfig;
pub use message_manager::{handler, Message, MessageHandler, Payload, RAW_FIELD};
pub use mqtt_handler::{Broker, ConnectionState, GatewayError, GatewayStatus, MqttGateway};
