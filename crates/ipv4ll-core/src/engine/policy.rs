//! Link-local policy for ACD outcomes
//!
//! | ACD event  | Reaction                                                   |
//! |------------|------------------------------------------------------------|
//! | `Ready`    | queue `Ready` with the current candidate                   |
//! | `Defended` | queue `Defended`                                           |
//! | `Conflict` | queue `Conflict`, then reselect (or stop, per policy)      |
//! | `Used`     | reselect and restart silently                              |
//! | `Down`     | queue `Down`, go idle                                      |
//!
//! A restart that fails after `Conflict` or `Used` is handled as `Down`, so a
//! single failure can leave both `Conflict` and `Down` in the queue.

use super::{Ipv4ll, Ipv4llEvent, State};
use crate::config::ConflictPolicy;
use crate::error::Result;
use crate::traits::AcdEvent;
use tracing::{debug, info, warn};

impl Ipv4ll {
    pub(super) fn handle_acd_event(&mut self, event: AcdEvent) -> Result<()> {
        match event {
            AcdEvent::Ready => match self.address() {
                Some(address) => {
                    info!("{} is ready", address);
                    self.events.push(Ipv4llEvent::Ready { address })
                }
                None => {
                    warn!("ACD reported ready without a configured address");
                    self.go_down()
                }
            },

            AcdEvent::Defended {
                operation,
                sender,
                target,
            } => {
                info!("Defended {} against {}", target, sender);
                self.events.push(Ipv4llEvent::Defended {
                    operation,
                    sender,
                    target,
                })
            }

            AcdEvent::Conflict {
                operation,
                sender,
                target,
            } => {
                warn!("Lost {} to {}", target, sender);
                self.events.push(Ipv4llEvent::Conflict {
                    operation,
                    sender,
                    target,
                })?;

                match self.conflict_policy {
                    ConflictPolicy::Reselect => self.reselect(),
                    ConflictPolicy::Stop => {
                        self.stop();
                        Ok(())
                    }
                }
            }

            AcdEvent::Used { sender, target, .. } => {
                debug!("{} already in use by {}", target, sender);
                self.reselect()
            }

            AcdEvent::Down => self.go_down(),
        }
    }

    /// Pick the next candidate and restart probing, or go down trying.
    fn reselect(&mut self) -> Result<()> {
        let ip = self.selector.next_address();

        let Some(config) = self.config.as_mut() else {
            warn!("No probe configuration to restart from");
            return self.go_down();
        };
        config.ip = ip;

        match self.acd.start(config) {
            Ok(()) => {
                info!("Probing {} on ifindex {}", ip, config.ifindex);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to restart ACD with {}: {}", ip, e);
                self.go_down()
            }
        }
    }

    fn go_down(&mut self) -> Result<()> {
        self.events.push(Ipv4llEvent::Down)?;
        self.state = State::Idle;
        info!("IPv4LL engine down");
        Ok(())
    }
}
