// # Event Stream
//
// Adapts the descriptor-driven engine to tokio.
//
// The context is registered with the reactor through `AsyncFd`. Whenever the
// queue runs dry while the engine is running, the stream waits for the
// descriptor to become readable, dispatches, and tries again.
//
// ## Usage
//
// ```rust,ignore
// use ipv4ll_core::{EventStream, Ipv4llEvent};
// use tokio_stream::StreamExt;
//
// let mut events = EventStream::new(ipv4ll)?;
// events.get_mut().start(&config)?;
//
// while let Some(event) = events.next().await {
//     if let Ipv4llEvent::Ready { address } = event? {
//         configure(address);
//         events.get_mut().announce()?;
//     }
// }
// ```

use crate::engine::{Ipv4ll, Ipv4llEvent, Pop};
use crate::error::Result;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::unix::AsyncFd;
use tokio_stream::Stream;

/// Stream of [`Ipv4llEvent`]s from a context
///
/// Yields owned copies of the events. The stream ends (yields `None`) when the
/// engine is stopped and the queue is empty; after a new
/// [`Ipv4ll::start`] through [`EventStream::get_mut`] it yields again.
#[derive(Debug)]
pub struct EventStream {
    inner: AsyncFd<Ipv4ll>,
}

impl EventStream {
    /// Register `ipv4ll` with the current tokio reactor
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(ipv4ll: Ipv4ll) -> Result<Self> {
        // SAFETY: a context never swaps its engine, and an engine keeps one
        // descriptor open for its whole lifetime
        let inner = unsafe { AsyncFd::register(ipv4ll) }.map_err(std::io::Error::from)?;
        Ok(Self { inner })
    }

    /// Shared access to the context
    pub fn get_ref(&self) -> &Ipv4ll {
        self.inner.get_ref()
    }

    /// Exclusive access to the context, e.g. to `announce`, `start` or `stop`
    pub fn get_mut(&mut self) -> &mut Ipv4ll {
        self.inner.get_mut()
    }

    /// Deregister from the reactor and return the context
    pub fn into_inner(self) -> Ipv4ll {
        self.inner.into_inner()
    }
}

impl Stream for EventStream {
    type Item = Result<Ipv4llEvent>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match this.inner.get_mut().pop_event() {
                Ok(Pop::Event(event)) => return Poll::Ready(Some(Ok(event.clone()))),
                Ok(Pop::Stopped) => return Poll::Ready(None),
                Ok(Pop::Done) => {}
                Err(e) => return Poll::Ready(Some(Err(e))),
            }

            let mut guard = match this.inner.poll_read_ready_mut(cx) {
                Poll::Ready(Ok(guard)) => guard,
                Poll::Ready(Err(e)) => return Poll::Ready(Some(Err(e.into()))),
                Poll::Pending => return Poll::Pending,
            };

            // dispatch() drains the descriptor, so the readiness can be cleared
            let dispatched = guard.get_inner_mut().dispatch();
            guard.clear_ready();

            if let Err(e) = dispatched {
                return Poll::Ready(Some(Err(e)));
            }
        }
    }
}
