//! Core traits for the IPv4LL engine
//!
//! This module defines the abstract interface the engine drives.
//!
//! - [`AcdEngine`]: Address conflict detection (probe, announce, defend)

pub mod acd;

pub use acd::{
    ARP_REPLY, ARP_REQUEST, AcdConfig, AcdEngine, AcdEngineFactory, AcdError, AcdEvent, AcdPoll,
    DefendPolicy,
};
