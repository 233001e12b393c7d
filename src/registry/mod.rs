//! Session registry for broadcast fan-out
//!
//! Every live session owns a `tokio::sync::watch` value with one pending slot
//! per channel. Broadcasting a part overwrites the slot of its channel in
//! each session, so a slow session skips parts instead of queueing them, and
//! the broadcaster never waits on a socket.
//!
//! # Architecture
//!
//! ```text
//!      [image channel]        [aux channel]
//!             │                     │
//!             └──► registry.broadcast(part) ◄──┘
//!                          │
//!         ┌────────────────┼────────────────┐
//!         ▼                ▼                ▼
//!      slots #1         slots #2         slots #3     (latest part per channel)
//!         │                │                │
//!     Session #1       Session #2       Session #3  ──► TCP
//! ```
//!
//! # Zero-Copy Design
//!
//! `bytes::Bytes` uses reference counting, so all sessions share the memory
//! of the ring slot a part was frozen from.

pub mod entry;
pub mod store;

pub use entry::{Delivery, SessionEntry, Subscription};
pub use store::SessionRegistry;
