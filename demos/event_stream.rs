//! The engine as a tokio stream
//!
//! Runs the engine over a simulated link with three hosts in the way and
//! prints every event until the address is claimed, then drops the carrier.

use ipv4ll_acd_sim::SimLink;
use ipv4ll_core::{
    AcdRegistry, AddressSelector, EventStream, Ipv4llConfig, Ipv4llEvent, LinkAddress,
};
use std::time::Duration;
use tokio_stream::StreamExt;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let link = SimLink::new();
    for (n, address) in AddressSelector::new(0).take(3).enumerate() {
        link.occupy(address, LinkAddress::from([0x02, 0, 0, 0, 0, n as u8 + 1]));
    }

    let registry = AcdRegistry::new();
    ipv4ll_acd_sim::register(&registry, &link);

    let mut events = EventStream::new(registry.create_context("sim")?)?;
    let config = Ipv4llConfig::new(1, LinkAddress::from([0xfe, 0xdc, 0xba, 0x98, 0x76, 0x54]))
        .with_timeout_msec(100);
    events.get_mut().start(&config)?;

    while let Some(event) = events.next().await {
        let event = event?;
        println!("[Event] {}", event);

        if let Ipv4llEvent::Ready { .. } = event {
            events.get_mut().announce()?;

            // Pull the cable a little later
            let link = link.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                link.set_carrier(false);
            });
        }
    }

    println!("Engine stopped");
    Ok(())
}
