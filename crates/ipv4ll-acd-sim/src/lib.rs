// # Simulated ACD Backend
//
// This crate provides an ACD engine that runs against a simulated link
// instead of a real interface.
//
// ## Behavior
//
// - Probing lasts `timeout_msec`. If another host holds the candidate when it
//   ends, or claims it meanwhile, the probe reports `Used`; otherwise `Ready`
// - `announce()` takes the address on the link and starts defending it
// - Claims by other hosts are defended or lost according to the
//   `DefendPolicy`, with the RFC 5227 defend interval
// - Carrier loss reports `Down`
//
// ## Descriptor
//
// Each engine owns a monotonic timerfd. The probe deadline arms it, and the
// link arms it for immediate expiry whenever something happens that the
// engine must look at. The descriptor therefore behaves like a real ACD
// socket: readable exactly when `dispatch()` has work to do.
//
// ## Platform Support
//
// This crate only compiles on Linux due to timerfd being a Linux-specific feature.
// On other targets it is empty.

#![cfg(target_os = "linux")]

mod link;
mod timer;

pub use link::{Claim, LOG_CAPACITY, SimLink};

use ipv4ll_core::traits::{
    ARP_REPLY, AcdConfig, AcdEngine, AcdEngineFactory, AcdError, AcdEvent, AcdPoll, DefendPolicy,
};
use ipv4ll_core::{AcdRegistry, LinkAddress, Transport};
use std::collections::VecDeque;
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::sync::Arc;
use std::time::{Duration, Instant};
use timer::TimerFd;
use tracing::{debug, info, warn};

/// Minimum time between two defenses of the same address (RFC 5227)
pub const DEFEND_INTERVAL: Duration = Duration::from_secs(10);

/// Backend name used by [`register`]
pub const BACKEND_NAME: &str = "sim";

#[derive(Debug, Clone, Copy)]
enum Phase {
    Init,
    Probing {
        deadline: Instant,
    },
    Ready,
    Announced {
        policy: DefendPolicy,
        last_defense: Option<Instant>,
    },
}

/// ACD engine attached to a [`SimLink`]
#[derive(Debug)]
pub struct SimAcd {
    link: SimLink,
    port: u64,
    timer: Arc<TimerFd>,
    config: Option<AcdConfig>,
    phase: Phase,
    events: VecDeque<AcdEvent>,
}

impl SimAcd {
    /// Create a stopped engine attached to `link`
    pub fn new(link: &SimLink) -> io::Result<Self> {
        let timer = Arc::new(TimerFd::new()?);
        let port = link.attach(Arc::clone(&timer));

        Ok(Self {
            link: link.clone(),
            port,
            timer,
            config: None,
            phase: Phase::Init,
            events: VecDeque::new(),
        })
    }

    /// Stop without discarding events already produced
    fn halt(&mut self) {
        if let (Phase::Announced { .. }, Some(config)) = (self.phase, &self.config) {
            self.link.give_up(config.ip, &config.mac);
        }

        self.phase = Phase::Init;

        if let Err(e) = self.timer.disarm() {
            warn!("Failed to disarm ACD timer: {}", e);
        }
    }

    fn handle_claim(&mut self, config: &AcdConfig, operation: u16, sender: LinkAddress) {
        let target = config.ip;

        match &mut self.phase {
            Phase::Init => {}

            // Anyone else probing or holding the address before we announced wins
            Phase::Probing { .. } | Phase::Ready => {
                debug!("{} claimed by {} before announcement", target, sender);
                self.events.push_back(AcdEvent::Used {
                    operation,
                    sender,
                    target,
                });
                self.halt();
            }

            Phase::Announced {
                policy,
                last_defense,
            } => {
                let now = Instant::now();
                let defend = match policy {
                    DefendPolicy::Never => false,
                    DefendPolicy::Always => true,
                    DefendPolicy::Once => {
                        last_defense.is_none_or(|at| now.duration_since(at) >= DEFEND_INTERVAL)
                    }
                };

                if defend {
                    *last_defense = Some(now);
                    self.link
                        .send(self.port, SimLink::announcement(&config.mac, target));
                    debug!("Defending {} against {}", target, sender);
                    self.events.push_back(AcdEvent::Defended {
                        operation,
                        sender,
                        target,
                    });
                } else {
                    info!("Lost {} to {}", target, sender);
                    self.events.push_back(AcdEvent::Conflict {
                        operation,
                        sender,
                        target,
                    });
                    self.halt();
                }
            }
        }
    }
}

impl AsFd for SimAcd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.timer.as_fd()
    }
}

impl AcdEngine for SimAcd {
    fn start(&mut self, config: &AcdConfig) -> Result<(), AcdError> {
        if !matches!(self.phase, Phase::Init) {
            return Err(AcdError::Busy);
        }
        if config.mac.is_empty() {
            return Err(AcdError::InvalidArgument(
                "hardware address must not be empty".to_string(),
            ));
        }
        if config.transport != Transport::Ethernet {
            return Err(AcdError::InvalidArgument(format!(
                "transport {} is not supported",
                config.transport
            )));
        }

        let timeout = Duration::from_millis(config.timeout_msec);
        let deadline = Instant::now().checked_add(timeout).ok_or_else(|| {
            AcdError::InvalidArgument(format!("timeout {:?} out of range", timeout))
        })?;
        self.timer.arm(timeout)?;

        // Anything seen before this probe is irrelevant to it
        let _ = self.link.take_inbox(self.port);
        self.events.clear();

        self.phase = Phase::Probing { deadline };
        self.config = Some(config.clone());

        debug!("Probing {} for {:?}", config.ip, timeout);
        Ok(())
    }

    fn stop(&mut self) {
        self.halt();
        self.events.clear();
    }

    fn dispatch(&mut self) -> Result<(), AcdError> {
        self.timer.drain()?;
        let inbox = self.link.take_inbox(self.port);

        if matches!(self.phase, Phase::Init) {
            return Ok(());
        }
        let Some(config) = self.config.clone() else {
            return Err(AcdError::Unexpected(
                "running without a configuration".to_string(),
            ));
        };

        if !self.link.carrier() {
            info!("Carrier lost, giving up {}", config.ip);
            self.events.push_back(AcdEvent::Down);
            self.halt();
            return Ok(());
        }

        for claim in inbox {
            if matches!(self.phase, Phase::Init) {
                break;
            }
            if claim.target != config.ip || claim.sender == config.mac {
                continue;
            }
            self.handle_claim(&config, claim.operation, claim.sender);
        }

        if let Phase::Probing { deadline } = self.phase {
            let now = Instant::now();

            if now < deadline {
                self.timer.arm(deadline - now)?;
                return Ok(());
            }

            match self.link.owner(config.ip) {
                Some(owner) if owner != config.mac => {
                    debug!("{} is held by {}", config.ip, owner);
                    self.events.push_back(AcdEvent::Used {
                        operation: ARP_REPLY,
                        sender: owner,
                        target: config.ip,
                    });
                    self.halt();
                }
                _ => {
                    debug!("Probe for {} succeeded", config.ip);
                    self.phase = Phase::Ready;
                    self.events.push_back(AcdEvent::Ready);
                }
            }
        }

        Ok(())
    }

    fn pop_event(&mut self) -> Result<AcdPoll, AcdError> {
        Ok(match self.events.pop_front() {
            Some(event) => AcdPoll::Event(event),
            None if matches!(self.phase, Phase::Init) => AcdPoll::Stopped,
            None => AcdPoll::Done,
        })
    }

    fn announce(&mut self, policy: DefendPolicy) -> Result<(), AcdError> {
        if !matches!(self.phase, Phase::Ready) {
            return Err(AcdError::Busy);
        }
        let Some(config) = &self.config else {
            return Err(AcdError::Unexpected("ready without a configuration".to_string()));
        };

        self.link.take(config.ip, &config.mac);
        self.link
            .send(self.port, SimLink::announcement(&config.mac, config.ip));

        info!("Announced {} ({:?})", config.ip, policy);
        self.phase = Phase::Announced {
            policy,
            last_defense: None,
        };
        Ok(())
    }
}

impl Drop for SimAcd {
    fn drop(&mut self) {
        self.halt();
        self.link.detach(self.port);
    }
}

/// Factory for engines on one simulated link
pub struct SimAcdFactory {
    link: SimLink,
}

impl SimAcdFactory {
    pub fn new(link: SimLink) -> Self {
        Self { link }
    }
}

impl AcdEngineFactory for SimAcdFactory {
    fn create(&self) -> Result<Box<dyn AcdEngine>, AcdError> {
        Ok(Box::new(SimAcd::new(&self.link)?))
    }
}

/// Register the simulated backend, bound to `link`
pub fn register(registry: &AcdRegistry, link: &SimLink) {
    registry.register_backend(BACKEND_NAME, Box::new(SimAcdFactory::new(link.clone())));
}
