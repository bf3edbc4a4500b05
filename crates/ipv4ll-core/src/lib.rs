// # ipv4ll-core
//
// Core library for Dynamic IPv4 Link-Local Address Configuration (RFC 3927).
//
// ## Architecture Overview
//
// This library provides a reusable, descriptor-driven link-local engine:
// - **AddressSelector**: Deterministic candidate selection inside 169.254.0.0/16
// - **AcdEngine**: Trait for the address-conflict-detection backend (probe/announce/defend)
// - **Ipv4ll**: Engine context that owns the backend and the event queue
// - **AcdRegistry**: Plugin-based registry for ACD backends
// - **EventStream**: Optional tokio adapter that turns the engine into a `Stream`
//
// ## Design Principles
//
// 1. **Caller-Driven**: No threads, no timers. The caller polls the descriptor and dispatches
// 2. **Single Ownership**: The context owns the backend and every queued event
// 3. **Deterministic**: A given enumeration seed always yields the same candidate sequence
// 4. **Library-First**: The daemon is a thin shell over this crate

pub mod address;
pub mod config;
pub mod engine;
pub mod error;
pub mod registry;
pub mod traits;

#[cfg(feature = "tokio")]
pub mod stream;

// Re-export core types for convenience
pub use address::{AddressSelector, is_usable};
pub use config::{ConflictPolicy, Ipv4llConfig, LinkAddress, Transport};
pub use engine::{Ipv4ll, Ipv4llEvent, Pop, State};
pub use error::{Error, Result};
pub use registry::AcdRegistry;
pub use traits::{AcdEngine, AcdEngineFactory};

#[cfg(feature = "tokio")]
pub use stream::EventStream;
