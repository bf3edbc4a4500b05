// # Simulated Link
//
// A shared broadcast medium. It knows which host holds which address, keeps
// a log of the latest ARP packets seen, and delivers claims made by other
// hosts to every engine attached to it.

use crate::timer::TimerFd;
use ipv4ll_core::LinkAddress;
use ipv4ll_core::traits::ARP_REQUEST;
use std::collections::{HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

/// Number of packets kept in the link log; older ones are dropped first
pub const LOG_CAPACITY: usize = 1024;

/// An ARP packet seen on the link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub operation: u16,
    pub sender: LinkAddress,
    pub target: Ipv4Addr,
}

/// Mailbox of one attached engine
#[derive(Debug)]
struct Port {
    timer: Arc<TimerFd>,
    inbox: VecDeque<Claim>,
}

#[derive(Debug)]
struct LinkState {
    carrier: bool,
    owners: HashMap<Ipv4Addr, LinkAddress>,
    log: VecDeque<Claim>,
    ports: HashMap<u64, Port>,
    next_port: u64,
}

impl LinkState {
    fn record(&mut self, claim: Claim) {
        if self.log.len() == LOG_CAPACITY {
            self.log.pop_front();
        }
        self.log.push_back(claim);
    }
}

/// Handle to a simulated link
///
/// Cloning yields another handle to the same link.
#[derive(Debug, Clone)]
pub struct SimLink {
    state: Arc<Mutex<LinkState>>,
}

impl Default for SimLink {
    fn default() -> Self {
        Self::new()
    }
}

impl SimLink {
    /// Create an empty link with carrier up
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LinkState {
                carrier: true,
                owners: HashMap::new(),
                log: VecDeque::new(),
                ports: HashMap::new(),
                next_port: 0,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Let the host `mac` hold `address`. Probes for it will report it as used.
    pub fn occupy(&self, address: Ipv4Addr, mac: LinkAddress) {
        debug!("{} occupies {}", mac, address);
        self.lock().owners.insert(address, mac);
    }

    /// Forget whoever holds `address`
    pub fn release(&self, address: Ipv4Addr) -> Option<LinkAddress> {
        self.lock().owners.remove(&address)
    }

    /// The host currently holding `address`
    pub fn owner(&self, address: Ipv4Addr) -> Option<LinkAddress> {
        self.lock().owners.get(&address).cloned()
    }

    /// Another host sends an ARP packet for `target`
    ///
    /// The packet is logged and delivered to every attached engine.
    pub fn claim(&self, operation: u16, sender: LinkAddress, target: Ipv4Addr) {
        let claim = Claim {
            operation,
            sender,
            target,
        };

        let mut state = self.lock();
        state.record(claim.clone());

        for port in state.ports.values_mut() {
            port.inbox.push_back(claim.clone());
            wake(&port.timer);
        }
    }

    /// Raise or drop the carrier. Dropping it takes every running engine down.
    pub fn set_carrier(&self, up: bool) {
        let mut state = self.lock();
        if state.carrier == up {
            return;
        }

        debug!("Carrier {}", if up { "up" } else { "down" });
        state.carrier = up;

        if !up {
            for port in state.ports.values() {
                wake(&port.timer);
            }
        }
    }

    pub fn carrier(&self) -> bool {
        self.lock().carrier
    }

    /// The last [`LOG_CAPACITY`] ARP packets seen on the link, oldest first
    pub fn log(&self) -> Vec<Claim> {
        self.lock().log.iter().cloned().collect()
    }

    pub(crate) fn attach(&self, timer: Arc<TimerFd>) -> u64 {
        let mut state = self.lock();
        let id = state.next_port;
        state.next_port += 1;
        state.ports.insert(
            id,
            Port {
                timer,
                inbox: VecDeque::new(),
            },
        );
        id
    }

    pub(crate) fn detach(&self, port: u64) {
        self.lock().ports.remove(&port);
    }

    /// Claims delivered to `port` since the last call
    pub(crate) fn take_inbox(&self, port: u64) -> VecDeque<Claim> {
        self.lock()
            .ports
            .get_mut(&port)
            .map(|port| std::mem::take(&mut port.inbox))
            .unwrap_or_default()
    }

    /// Log an announcement or defense sent by an attached engine
    ///
    /// Own packets are not delivered back to the sender's port.
    pub(crate) fn send(&self, port: u64, claim: Claim) {
        let mut state = self.lock();
        state.record(claim.clone());

        for (id, other) in state.ports.iter_mut() {
            if *id != port {
                other.inbox.push_back(claim.clone());
                wake(&other.timer);
            }
        }
    }

    /// Take `address` for `mac`, the way an announcement does
    pub(crate) fn take(&self, address: Ipv4Addr, mac: &LinkAddress) {
        self.lock().owners.insert(address, mac.clone());
    }

    /// Give up `address` if `mac` still holds it
    pub(crate) fn give_up(&self, address: Ipv4Addr, mac: &LinkAddress) {
        let mut state = self.lock();
        if state.owners.get(&address) == Some(mac) {
            state.owners.remove(&address);
        }
    }

    /// Build an announcement claim from `mac` for `address`
    pub(crate) fn announcement(mac: &LinkAddress, address: Ipv4Addr) -> Claim {
        Claim {
            operation: ARP_REQUEST,
            sender: mac.clone(),
            target: address,
        }
    }
}

fn wake(timer: &TimerFd) {
    if let Err(e) = timer.arm(Duration::ZERO) {
        warn!("Failed to wake simulated ACD engine: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ipv4ll_core::traits::ARP_REPLY;

    fn mac(n: u8) -> LinkAddress {
        LinkAddress::from([0x02, 0, 0, 0, 0, n])
    }

    #[test]
    fn test_occupy_and_release() {
        let link = SimLink::new();
        let address = Ipv4Addr::new(169, 254, 1, 1);

        assert_eq!(link.owner(address), None);
        link.occupy(address, mac(1));
        assert_eq!(link.owner(address), Some(mac(1)));
        assert_eq!(link.release(address), Some(mac(1)));
        assert_eq!(link.owner(address), None);
    }

    #[test]
    fn test_claims_reach_attached_ports() {
        let link = SimLink::new();
        let timer = Arc::new(TimerFd::new().unwrap());
        let port = link.attach(Arc::clone(&timer));

        let target = Ipv4Addr::new(169, 254, 7, 7);
        link.claim(ARP_REPLY, mac(3), target);

        let inbox = link.take_inbox(port);
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].sender, mac(3));
        assert!(link.take_inbox(port).is_empty());
        assert_eq!(link.log().len(), 1);

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(timer.drain().unwrap(), 1, "claim must wake the port");
    }

    #[test]
    fn test_own_packets_are_not_echoed() {
        let link = SimLink::new();
        let a = link.attach(Arc::new(TimerFd::new().unwrap()));
        let b = link.attach(Arc::new(TimerFd::new().unwrap()));

        let address = Ipv4Addr::new(169, 254, 9, 9);
        link.send(a, SimLink::announcement(&mac(1), address));

        assert!(link.take_inbox(a).is_empty());
        assert_eq!(link.take_inbox(b).len(), 1);
    }

    #[test]
    fn test_give_up_only_own_address() {
        let link = SimLink::new();
        let address = Ipv4Addr::new(169, 254, 2, 2);

        link.take(address, &mac(1));
        link.give_up(address, &mac(2));
        assert_eq!(link.owner(address), Some(mac(1)));
        link.give_up(address, &mac(1));
        assert_eq!(link.owner(address), None);
    }

    #[test]
    fn test_detached_port_gets_nothing() {
        let link = SimLink::new();
        let port = link.attach(Arc::new(TimerFd::new().unwrap()));
        link.detach(port);

        link.claim(ARP_REQUEST, mac(1), Ipv4Addr::new(169, 254, 3, 3));
        assert!(link.take_inbox(port).is_empty());
    }

    #[test]
    fn test_log_keeps_the_latest_packets() {
        let link = SimLink::new();
        let target = Ipv4Addr::new(169, 254, 4, 4);

        for n in 0..LOG_CAPACITY + 10 {
            link.claim(ARP_REQUEST, mac((n % 256) as u8), target);
        }

        let log = link.log();
        assert_eq!(log.len(), LOG_CAPACITY);
        assert_eq!(log[0].sender, mac(10));
        assert_eq!(
            log[LOG_CAPACITY - 1].sender,
            mac(((LOG_CAPACITY + 9) % 256) as u8)
        );
    }
}
