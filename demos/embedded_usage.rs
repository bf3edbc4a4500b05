//! Minimal embedding example for ipv4ll-core
//!
//! This example drives the engine from a hand-written poll(2) loop, the way
//! an application with its own event loop embeds it. The ACD backend runs on
//! a simulated link with one other host on it.

use ipv4ll_acd_sim::{SimAcdFactory, SimLink};
use ipv4ll_core::traits::ARP_REQUEST;
use ipv4ll_core::{
    AddressSelector, Ipv4ll, Ipv4llConfig, Ipv4llEvent, LinkAddress, Pop, Result,
};
use std::net::Ipv4Addr;
use std::os::fd::AsRawFd;

/// Block until the context's descriptor is readable, then dispatch and
/// collect everything it queued
fn poll_once(ipv4ll: &mut Ipv4ll) -> Result<(Vec<Ipv4llEvent>, bool)> {
    let mut pfd = libc::pollfd {
        fd: ipv4ll.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };

    // SAFETY: `pfd` is a valid pollfd for the duration of the call
    if unsafe { libc::poll(&mut pfd, 1, -1) } < 0 {
        return Err(std::io::Error::last_os_error().into());
    }

    ipv4ll.dispatch()?;

    let mut events = Vec::new();
    loop {
        match ipv4ll.pop_event()? {
            Pop::Event(event) => events.push(event.clone()),
            Pop::Done => return Ok((events, false)),
            Pop::Stopped => return Ok((events, true)),
        }
    }
}

/// Poll until an event arrives
fn next_events(ipv4ll: &mut Ipv4ll) -> Result<Vec<Ipv4llEvent>> {
    loop {
        let (events, stopped) = poll_once(ipv4ll)?;
        if !events.is_empty() || stopped {
            return Ok(events);
        }
    }
}

fn main() -> Result<()> {
    println!("=== Embedded ipv4ll-core Example ===\n");

    let local = LinkAddress::from([0x02, 0x00, 0x5e, 0x10, 0x00, 0x01]);
    let neighbor = LinkAddress::from([0x02, 0x00, 0x5e, 0x10, 0x00, 0x02]);
    let enumeration = 7;

    // Another host already holds our first candidate
    let link = SimLink::new();
    let taken = AddressSelector::new(enumeration).next_address();
    link.occupy(taken, neighbor.clone());
    println!("1. {} is held by {}", taken, neighbor);

    println!("2. Creating context...");
    let mut ipv4ll = Ipv4ll::new(&SimAcdFactory::new(link.clone()))?;

    let config = Ipv4llConfig::new(1, local)
        .with_enumeration(enumeration)
        .with_timeout_msec(200);

    println!("3. Probing...");
    ipv4ll.start(&config)?;

    let address: Ipv4Addr = loop {
        match next_events(&mut ipv4ll)?.as_slice() {
            [Ipv4llEvent::Ready { address }] => break *address,
            other => println!("[Event] {:?}", other),
        }
    };
    println!("   Ready: {} (configure it, then announce)", address);
    ipv4ll.announce()?;

    println!("4. Neighbor claims {} twice...", address);
    for _ in 0..2 {
        link.claim(ARP_REQUEST, neighbor.clone(), address);
        for event in next_events(&mut ipv4ll)? {
            println!("[Event] {}", event);
        }
    }

    println!("5. Waiting for the next address...");
    for event in next_events(&mut ipv4ll)? {
        println!("[Event] {}", event);
    }

    println!("6. Stopping and dropping the context");
    ipv4ll.stop();
    drop(ipv4ll);

    println!("\n=== Embedding Successful ===");
    println!("Key Points:");
    println!("- One descriptor, one dispatch call, one event queue");
    println!("- No threads, no timers outside the descriptor");
    println!("- The application decides when to announce and when to restart");

    Ok(())
}
