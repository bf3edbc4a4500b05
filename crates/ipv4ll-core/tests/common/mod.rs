//! Test doubles and common utilities for engine contract tests
//!
//! This module provides a scripted ACD engine that resolves probes from a
//! queue of outcomes, lets tests inject ACD events, and keeps enough
//! bookkeeping (starts, announces, live instances) to verify the engine's
//! side effects without any real network I/O.

#![allow(dead_code)]

use ipv4ll_core::traits::{
    ARP_REQUEST, AcdConfig, AcdEngine, AcdError, AcdEvent, AcdPoll, DefendPolicy,
};
use ipv4ll_core::{Ipv4ll, Ipv4llConfig, LinkAddress, Pop};
use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::Ipv4Addr;
use std::os::fd::{AsFd, BorrowedFd};
use std::os::unix::net::UnixDatagram;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Where the scripted engine is in its probe/announce cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Probing,
    Ready,
    Announced,
}

/// How the next probe resolves
#[derive(Debug, Clone)]
pub enum ProbeOutcome {
    /// Nobody answered
    Ready,
    /// Another host owns the address
    Used(LinkAddress),
}

#[derive(Debug)]
struct Script {
    phase: Phase,
    outcomes: VecDeque<ProbeOutcome>,
    injected: VecDeque<AcdEvent>,
    events: VecDeque<AcdEvent>,
    starts: Vec<AcdConfig>,
    announces: Vec<DefendPolicy>,
    stops: usize,
    dispatches: usize,
    failing_starts: usize,
    dispatch_error: Option<AcdError>,
    pop_error: Option<AcdError>,
}

impl Script {
    fn new() -> Self {
        Self {
            phase: Phase::Init,
            outcomes: VecDeque::new(),
            injected: VecDeque::new(),
            events: VecDeque::new(),
            starts: Vec::new(),
            announces: Vec::new(),
            stops: 0,
            dispatches: 0,
            failing_starts: 0,
            dispatch_error: None,
            pop_error: None,
        }
    }
}

/// A scripted ACD engine
///
/// Its descriptor is one end of a datagram socket pair; the other end is
/// written whenever the engine has something to dispatch.
pub struct ScriptedAcd {
    socket: UnixDatagram,
    waker: Arc<UnixDatagram>,
    script: Arc<Mutex<Script>>,
    live: Arc<AtomicUsize>,
}

/// Test-side handle to a [`ScriptedAcd`]
#[derive(Clone)]
pub struct AcdHandle {
    waker: Arc<UnixDatagram>,
    script: Arc<Mutex<Script>>,
    live: Arc<AtomicUsize>,
}

impl ScriptedAcd {
    /// Create a new scripted engine and the handle that controls it
    pub fn new() -> (Self, AcdHandle) {
        let (socket, waker) = UnixDatagram::pair().expect("socket pair");
        socket.set_nonblocking(true).expect("nonblocking socket");

        let waker = Arc::new(waker);
        let script = Arc::new(Mutex::new(Script::new()));
        let live = Arc::new(AtomicUsize::new(1));

        let handle = AcdHandle {
            waker: Arc::clone(&waker),
            script: Arc::clone(&script),
            live: Arc::clone(&live),
        };

        (
            Self {
                socket,
                waker,
                script,
                live,
            },
            handle,
        )
    }

    fn wake(&self) {
        let _ = self.waker.send(&[1]);
    }

    fn drain(&self) {
        let mut buf = [0u8; 16];
        loop {
            match self.socket.recv(&mut buf) {
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => panic!("scripted socket failed: {}", e),
            }
        }
    }
}

impl Drop for ScriptedAcd {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl AsFd for ScriptedAcd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

impl AcdEngine for ScriptedAcd {
    fn start(&mut self, config: &AcdConfig) -> Result<(), AcdError> {
        let mut script = self.script.lock().unwrap();

        if script.phase != Phase::Init {
            return Err(AcdError::Busy);
        }
        if script.failing_starts > 0 {
            script.failing_starts -= 1;
            return Err(AcdError::Unexpected("scripted start failure".to_string()));
        }

        script.starts.push(config.clone());
        script.phase = Phase::Probing;
        drop(script);

        self.wake();
        Ok(())
    }

    fn stop(&mut self) {
        let mut script = self.script.lock().unwrap();
        script.stops += 1;
        script.phase = Phase::Init;
    }

    fn dispatch(&mut self) -> Result<(), AcdError> {
        self.drain();

        let mut script = self.script.lock().unwrap();
        script.dispatches += 1;

        if let Some(err) = script.dispatch_error.take() {
            return Err(err);
        }

        if script.phase == Phase::Probing {
            let target = script.starts.last().map(|c| c.ip).expect("probing without start");

            match script.outcomes.pop_front().unwrap_or(ProbeOutcome::Ready) {
                ProbeOutcome::Ready => {
                    script.phase = Phase::Ready;
                    script.events.push_back(AcdEvent::Ready);
                }
                ProbeOutcome::Used(sender) => {
                    script.phase = Phase::Init;
                    script.events.push_back(AcdEvent::Used {
                        operation: ARP_REQUEST,
                        sender,
                        target,
                    });
                }
            }
        }

        while let Some(event) = script.injected.pop_front() {
            match event {
                AcdEvent::Conflict { .. } | AcdEvent::Used { .. } | AcdEvent::Down => {
                    script.phase = Phase::Init;
                }
                AcdEvent::Ready => script.phase = Phase::Ready,
                AcdEvent::Defended { .. } => {}
            }
            script.events.push_back(event);
        }

        Ok(())
    }

    fn pop_event(&mut self) -> Result<AcdPoll, AcdError> {
        let mut script = self.script.lock().unwrap();

        if let Some(err) = script.pop_error.take() {
            return Err(err);
        }

        Ok(match script.events.pop_front() {
            Some(event) => AcdPoll::Event(event),
            None if script.phase == Phase::Init => AcdPoll::Stopped,
            None => AcdPoll::Done,
        })
    }

    fn announce(&mut self, policy: DefendPolicy) -> Result<(), AcdError> {
        let mut script = self.script.lock().unwrap();

        if script.phase != Phase::Ready {
            return Err(AcdError::Busy);
        }

        script.announces.push(policy);
        script.phase = Phase::Announced;
        Ok(())
    }
}

impl AcdHandle {
    /// Resolve the next probe with `outcome` (probes default to `Ready`)
    pub fn push_outcome(&self, outcome: ProbeOutcome) {
        self.script.lock().unwrap().outcomes.push_back(outcome);
    }

    /// Deliver `event` on the next dispatch
    pub fn inject(&self, event: AcdEvent) {
        self.script.lock().unwrap().injected.push_back(event);
        let _ = self.waker.send(&[1]);
    }

    /// Make the next `n` start calls fail with an internal error
    pub fn fail_next_starts(&self, n: usize) {
        self.script.lock().unwrap().failing_starts = n;
    }

    /// Make the next dispatch fail with `err`
    pub fn fail_next_dispatch(&self, err: AcdError) {
        self.script.lock().unwrap().dispatch_error = Some(err);
    }

    /// Make the next pop_event fail with `err`
    pub fn fail_next_pop(&self, err: AcdError) {
        self.script.lock().unwrap().pop_error = Some(err);
    }

    pub fn phase(&self) -> Phase {
        self.script.lock().unwrap().phase
    }

    /// Every configuration the engine was started with, in order
    pub fn starts(&self) -> Vec<AcdConfig> {
        self.script.lock().unwrap().starts.clone()
    }

    /// Every address the engine probed, in order
    pub fn probed_addresses(&self) -> Vec<Ipv4Addr> {
        self.starts().into_iter().map(|c| c.ip).collect()
    }

    pub fn announces(&self) -> Vec<DefendPolicy> {
        self.script.lock().unwrap().announces.clone()
    }

    pub fn stop_count(&self) -> usize {
        self.script.lock().unwrap().stops
    }

    pub fn dispatch_count(&self) -> usize {
        self.script.lock().unwrap().dispatches
    }

    /// Number of scripted engines not yet dropped
    pub fn live_engines(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// Hardware address of the host under test
pub fn local_mac() -> LinkAddress {
    LinkAddress::from([0xfe, 0xdc, 0xba, 0x98, 0x76, 0x54])
}

/// Hardware address of another host on the link
pub fn peer_mac(n: u8) -> LinkAddress {
    LinkAddress::from([0x02, 0x00, 0x00, 0x00, 0x00, n])
}

/// Helper to create a minimal configuration for testing
pub fn minimal_config() -> Ipv4llConfig {
    Ipv4llConfig::new(1, local_mac()).with_timeout_msec(100)
}

/// A fresh context on a scripted engine
pub fn scripted_context() -> (Ipv4ll, AcdHandle) {
    let (acd, handle) = ScriptedAcd::new();
    (Ipv4ll::with_engine(Box::new(acd)), handle)
}

/// Owned view of a pop result, for assertions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Popped {
    Event(ipv4ll_core::Ipv4llEvent),
    Done,
    Stopped,
}

pub fn pop(ipv4ll: &mut Ipv4ll) -> Popped {
    match ipv4ll.pop_event().expect("pop_event succeeds") {
        Pop::Event(event) => Popped::Event(event.clone()),
        Pop::Done => Popped::Done,
        Pop::Stopped => Popped::Stopped,
    }
}

/// Pop until the queue runs dry, returning the events and the final status
pub fn drain(ipv4ll: &mut Ipv4ll) -> (Vec<ipv4ll_core::Ipv4llEvent>, Popped) {
    let mut events = Vec::new();
    loop {
        match pop(ipv4ll) {
            Popped::Event(event) => events.push(event),
            status => return (events, status),
        }
    }
}
