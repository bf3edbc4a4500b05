//! IPv4LL engine context
//!
//! The [`Ipv4ll`] context is responsible for:
//! - Selecting candidate addresses from the enumeration seed
//! - Driving a single ACD probe/announce cycle at a time
//! - Translating ACD outcomes into link-local policy (retry, report, stop)
//! - Queueing events for the caller
//!
//! ## Architecture
//!
//! ```text
//!   caller: poll(fd) ──► dispatch() ──► pop_event()
//!                            │               ▲
//!                            ▼               │
//!                     ┌─────────────┐  ┌────────────┐
//!                     │  AcdEngine  │  │ EventQueue │
//!                     └─────────────┘  └────────────┘
//!                            │               ▲
//!                            ▼               │
//!                     ┌──────────────────────────┐
//!                     │  ACD event policy        │
//!                     │  (reselect / report)     │
//!                     └──────────────────────────┘
//! ```
//!
//! ## Event Flow
//!
//! 1. `start()` picks a candidate and starts an ACD probe
//! 2. The caller polls the descriptor and calls `dispatch()`
//! 3. `dispatch()` drains ACD events through the policy
//! 4. The policy may pick a new candidate and restart the probe, or queue an event
//! 5. The caller drains `pop_event()` until it reports `Done` or `Stopped`

mod policy;
mod queue;

use crate::address::AddressSelector;
use crate::config::{ConflictPolicy, Ipv4llConfig, LinkAddress};
use crate::error::{Error, Result};
use crate::traits::{AcdConfig, AcdEngine, AcdEngineFactory, AcdPoll, DefendPolicy};
use queue::EventQueue;
use std::fmt;
use std::net::Ipv4Addr;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};
use tracing::{debug, info, warn};

/// Events delivered to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ipv4llEvent {
    /// The candidate survived probing.
    ///
    /// The caller must configure it on the interface and then call
    /// [`Ipv4ll::announce`]. No further events arrive before that.
    Ready { address: Ipv4Addr },

    /// A conflicting claim was observed and the address was defended.
    /// Informational only.
    Defended {
        operation: u16,
        sender: LinkAddress,
        target: Ipv4Addr,
    },

    /// A conflicting claim was observed and the address was lost.
    ///
    /// The caller must stop using the address immediately.
    Conflict {
        operation: u16,
        sender: LinkAddress,
        target: Ipv4Addr,
    },

    /// The link became unusable and the engine stopped
    Down,
}

impl fmt::Display for Ipv4llEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ipv4llEvent::Ready { address } => write!(f, "ready {}", address),
            Ipv4llEvent::Defended { sender, target, .. } => {
                write!(f, "defended {} against {}", target, sender)
            }
            Ipv4llEvent::Conflict { sender, target, .. } => {
                write!(f, "lost {} to {}", target, sender)
            }
            Ipv4llEvent::Down => f.write_str("down"),
        }
    }
}

/// Outcome of [`Ipv4ll::pop_event`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pop<'a> {
    /// The next event. It stays valid until the next `pop_event` call.
    Event(&'a Ipv4llEvent),
    /// No events right now, but the engine is running: keep polling
    Done,
    /// No events, and the engine is stopped: only `start` does anything now
    Stopped,
}

/// Lifecycle state of the context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// No probe outstanding
    Idle,
    /// A probe/announce cycle is active
    Running,
}

/// IPv4 link-local engine context
///
/// ## Lifecycle
///
/// 1. Create with [`Ipv4ll::new()`] or [`Ipv4ll::with_engine()`]
/// 2. Start with [`Ipv4ll::start()`]; stop with [`Ipv4ll::stop()`], as often as needed
/// 3. Drop to tear down: any probe is stopped and every event released
///
/// ## Threading
///
/// The context never blocks and never spawns. It can move between threads
/// but is meant to be driven from a single event loop.
pub struct Ipv4ll {
    /// Candidate generator, reseeded on every start
    selector: AddressSelector,

    /// ACD backend, created once and reused across runs
    acd: Box<dyn AcdEngine>,

    /// Configuration of the current (or last) probe
    config: Option<AcdConfig>,

    /// Reaction to a lost address for the current run
    conflict_policy: ConflictPolicy,

    state: State,

    events: EventQueue<Ipv4llEvent>,
}

impl Ipv4ll {
    /// Create a new context with a fresh ACD engine from `factory`
    ///
    /// # Returns
    ///
    /// - `Ok(Ipv4ll)`: An idle context
    /// - `Err(Error)`: `ResourceExhausted` or `NotRecoverable` if the engine
    ///   could not be created
    pub fn new(factory: &dyn AcdEngineFactory) -> Result<Self> {
        let acd = factory.create().map_err(Error::from_acd)?;
        Ok(Self::with_engine(acd))
    }

    /// Create a new context around an existing, stopped ACD engine
    pub fn with_engine(acd: Box<dyn AcdEngine>) -> Self {
        debug!("Created IPv4LL context");

        Self {
            selector: AddressSelector::default(),
            acd,
            config: None,
            conflict_policy: ConflictPolicy::default(),
            state: State::Idle,
            events: EventQueue::new(),
        }
    }

    /// The pollable descriptor backing this context
    ///
    /// Stable for the lifetime of the context and safe to query in any state.
    pub fn descriptor(&self) -> BorrowedFd<'_> {
        self.acd.as_fd()
    }

    /// Current lifecycle state
    pub fn state(&self) -> State {
        self.state
    }

    /// The candidate address of the current (or last) run
    pub fn address(&self) -> Option<Ipv4Addr> {
        self.config.as_ref().map(|config| config.ip)
    }

    /// Number of events waiting to be popped
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    /// Dispatch the context after its descriptor became readable
    ///
    /// Dispatches the ACD engine and feeds every event it produced through
    /// the link-local policy, until the engine has nothing more to report.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: All pending ACD events were processed
    /// - `Err(Error)`: The ACD engine failed; the context should be dropped
    pub fn dispatch(&mut self) -> Result<()> {
        self.acd.dispatch().map_err(|e| {
            warn!("ACD dispatch failed: {}", e);
            Error::from_acd(e)
        })?;

        loop {
            match self.acd.pop_event().map_err(Error::from_acd)? {
                AcdPoll::Event(event) => self.handle_acd_event(event)?,
                AcdPoll::Done => break,
                AcdPoll::Stopped => {
                    if self.state == State::Running {
                        debug!("ACD engine stopped, IPv4LL going idle");
                    }
                    self.state = State::Idle;
                    break;
                }
            }
        }

        Ok(())
    }

    /// Get the next pending event
    ///
    /// The returned event is owned by the context and stays valid until the
    /// next call to `pop_event` (or until the context is dropped). Calling
    /// `pop_event` again releases it.
    ///
    /// # Returns
    ///
    /// - `Pop::Event`: The next event
    /// - `Pop::Done`: No events, engine running
    /// - `Pop::Stopped`: No events, engine stopped
    pub fn pop_event(&mut self) -> Result<Pop<'_>> {
        let state = self.state;

        Ok(match self.events.pop() {
            Some(event) => Pop::Event(event),
            None if state == State::Idle => Pop::Stopped,
            None => Pop::Done,
        })
    }

    /// Announce the probed address and start defending it
    ///
    /// Must be called in response to [`Ipv4llEvent::Ready`], once the address
    /// is configured on the interface. The address is defended once per
    /// conflict; a second conflict inside the defend interval loses it.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Announcement started
    /// - `Err(Error::Busy)`: Not in response to a `Ready` event
    pub fn announce(&mut self) -> Result<()> {
        if self.state == State::Idle {
            return Err(Error::busy("IPv4LL engine is not running"));
        }

        self.acd
            .announce(DefendPolicy::Once)
            .map_err(Error::from_acd_request)?;

        if let Some(address) = self.address() {
            info!("Announcing {}", address);
        }

        Ok(())
    }

    /// Start probing for an address
    ///
    /// The engine must be idle with no pending events. `config.enumeration`
    /// determines the sequence of candidates; a `requested_address`, if any,
    /// is probed first instead of a selected one.
    ///
    /// # Returns
    ///
    /// - `Ok(())`: Probing started, state is `Running`
    /// - `Err(Error::Busy)`: Already running, or events are still pending
    /// - `Err(Error::InvalidArgument)`: The configuration was rejected
    pub fn start(&mut self, config: &Ipv4llConfig) -> Result<()> {
        if self.state == State::Running {
            return Err(Error::busy("IPv4LL engine is already running"));
        }
        if !self.events.is_empty() {
            return Err(Error::busy(format!(
                "{} event(s) still pending",
                self.events.len()
            )));
        }

        config.validate()?;

        self.selector = AddressSelector::new(config.enumeration);

        let ip = match config.requested_address {
            Some(address) => address,
            None => self.selector.next_address(),
        };

        let acd_config = AcdConfig {
            ifindex: config.ifindex,
            mac: config.link_address.clone(),
            transport: config.transport,
            ip,
            timeout_msec: config.timeout_msec,
        };

        self.acd
            .start(&acd_config)
            .map_err(Error::from_acd_request)?;

        info!(
            "Probing {} on ifindex {} ({})",
            ip,
            config.ifindex,
            if config.requested_address.is_some() {
                "requested"
            } else {
                "selected"
            }
        );

        self.config = Some(acd_config);
        self.conflict_policy = config.conflict_policy;
        self.state = State::Running;

        Ok(())
    }

    /// Stop the engine
    ///
    /// Never fails. Events already queued stay poppable.
    pub fn stop(&mut self) {
        self.acd.stop();
        if self.state == State::Running {
            debug!("IPv4LL engine stopped");
        }
        self.state = State::Idle;
    }
}

impl AsFd for Ipv4ll {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.descriptor()
    }
}

impl AsRawFd for Ipv4ll {
    fn as_raw_fd(&self) -> RawFd {
        self.descriptor().as_raw_fd()
    }
}

impl Drop for Ipv4ll {
    fn drop(&mut self) {
        self.stop();

        let pending = self.events.len();
        self.events.clear();

        debug!("IPv4LL context released ({} pending event(s) dropped)", pending);
    }
}

impl fmt::Debug for Ipv4ll {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Ipv4ll")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("conflict_policy", &self.conflict_policy)
            .field("pending_events", &self.events.len())
            .finish_non_exhaustive()
    }
}
