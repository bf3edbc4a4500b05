// # ACD Engine Trait
//
// Defines the interface to the address conflict detection (RFC 5227) engine
// the link-local engine is built on.
//
// ## Responsibilities
//
// The ACD engine owns everything on the wire: ARP probe/announce timing,
// packet transmission and reception, and the defend-or-yield decision.
// The link-local engine only decides *which* address to probe and what to
// do with the outcome.
//
// ## Implementations
//
// - Simulated link: `ipv4ll-acd-sim` crate
// - Test doubles: `tests/common` in this crate
//
// ## Usage
//
// ```rust,ignore
// use ipv4ll_core::traits::{AcdEngine, AcdPoll};
//
// let mut acd = /* AcdEngine implementation */;
// acd.start(&config)?;
//
// // after poll(2) reports the descriptor readable
// acd.dispatch()?;
// while let AcdPoll::Event(event) = acd.pop_event()? {
//     println!("ACD event: {:?}", event);
// }
// ```

use crate::config::{LinkAddress, Transport};
use std::net::Ipv4Addr;
use std::os::fd::AsFd;
use thiserror::Error;

/// ARP request operation code
pub const ARP_REQUEST: u16 = 1;

/// ARP reply operation code
pub const ARP_REPLY: u16 = 2;

/// Configuration for one ACD probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcdConfig {
    /// Interface index
    pub ifindex: u32,
    /// Hardware address of the interface
    pub mac: LinkAddress,
    /// Link-layer transport of the interface
    pub transport: Transport,
    /// Address to probe
    pub ip: Ipv4Addr,
    /// Probe timeout in milliseconds
    pub timeout_msec: u64,
}

/// How many times the engine defends an announced address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefendPolicy {
    /// Give up on the first conflict
    Never,
    /// Defend once; a second conflict within the defend interval is lost
    Once,
    /// Always defend
    Always,
}

/// Events produced by the ACD engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcdEvent {
    /// Probing finished without conflicts; waiting for `announce()`
    Ready,

    /// Another host claimed the announced address and was answered
    Defended {
        operation: u16,
        sender: LinkAddress,
        target: Ipv4Addr,
    },

    /// Another host claimed the announced address and won; the engine stopped
    Conflict {
        operation: u16,
        sender: LinkAddress,
        target: Ipv4Addr,
    },

    /// The probed address is already in use; the engine stopped
    Used {
        operation: u16,
        sender: LinkAddress,
        target: Ipv4Addr,
    },

    /// The link went away; the engine stopped
    Down,
}

/// Outcome of [`AcdEngine::pop_event`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcdPoll {
    /// The next pending event
    Event(AcdEvent),
    /// No pending events, but the engine is running
    Done,
    /// No pending events, and the engine is stopped
    Stopped,
}

/// Errors reported by ACD engines
#[derive(Error, Debug)]
pub enum AcdError {
    /// The request does not fit the engine's current state
    #[error("ACD engine busy")]
    Busy,

    /// The engine rejected the configuration it was handed
    #[error("ACD invalid argument: {0}")]
    InvalidArgument(String),

    /// Allocation failure inside the engine
    #[error("ACD engine out of memory")]
    OutOfMemory,

    /// Internal condition the engine cannot explain
    #[error("ACD internal error: {0}")]
    Unexpected(String),

    /// I/O failure on the engine's sockets or timers
    #[error("ACD I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Trait for ACD engine implementations
///
/// An engine runs a single probe at a time. It is created once per
/// [`crate::Ipv4ll`] context and reused across start/stop cycles.
///
/// # Descriptor Contract
///
/// The engine exposes exactly one pollable descriptor through [`AsFd`]. It
/// must stay the same for the lifetime of the engine. When it becomes
/// readable, the owner calls [`AcdEngine::dispatch`] and then drains
/// [`AcdEngine::pop_event`] until it reports `Done` or `Stopped`.
///
/// # Blocking
///
/// No method may block. Timers are the engine's own business and must be
/// surfaced through the descriptor.
pub trait AcdEngine: AsFd + Send {
    /// Start probing `config.ip`
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Probing has begun
    /// - `Err(AcdError::Busy)`: A probe is already running
    fn start(&mut self, config: &AcdConfig) -> Result<(), AcdError>;

    /// Stop any running probe or defense. Never fails.
    fn stop(&mut self);

    /// Process whatever made the descriptor readable
    fn dispatch(&mut self) -> Result<(), AcdError>;

    /// Take the next pending event
    fn pop_event(&mut self) -> Result<AcdPoll, AcdError>;

    /// Announce the probed address and start defending it
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Announcement sent
    /// - `Err(AcdError::Busy)`: Not in response to an [`AcdEvent::Ready`]
    fn announce(&mut self, policy: DefendPolicy) -> Result<(), AcdError>;
}

/// Helper trait for constructing ACD engines
pub trait AcdEngineFactory: Send + Sync {
    /// Create a fresh, stopped ACD engine
    fn create(&self) -> Result<Box<dyn AcdEngine>, AcdError>;
}
