//! relay-server library crate.
//!
//! A Pusher-compatible WebSocket relay.  Browsers and mobile clients connect
//! under an application key, subscribe to public, private, or presence
//! channels, and receive every event published on them.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! WebSocket clients (Pusher JSON frames)
//!         ↕
//! [relay-server]
//!   ├── domain/           Configuration schema, report types
//!   ├── application/      Connection registry, channel manager, broadcast
//!   │                     router, statistics collector, protocol handler
//!   └── infrastructure/
//!         ├── ws_server/  Accept loop and per-connection tasks (tokio-tungstenite)
//!         ├── transport/  Per-connection outbound queues
//!         └── ...         App registry, HMAC authenticator, statistics flush
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` depends on `domain` and `relay-core` only; every
//!   collaborator it needs (transport, authenticator, app registry,
//!   statistics sink) is a trait in `application::ports`.
//! - `infrastructure` implements those traits with `tokio` and
//!   `tokio-tungstenite` and wires everything together.

/// Domain layer: configuration schema and report types (no I/O).
pub mod domain;

/// Application layer: channel bookkeeping and protocol logic.
pub mod application;

/// Infrastructure layer: WebSocket server, queues, and collaborators.
pub mod infrastructure;
