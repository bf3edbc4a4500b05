//! Link-local candidate selection
//!
//! Candidates are drawn from 169.254.0.0/16 with the first and last 256
//! addresses excluded (RFC 3927 §2.1), leaving 65,024 usable addresses.
//!
//! The sequence is driven by the 48-bit drand48 linear-congruential
//! generator, seeded from the caller's enumeration value. The exact
//! generator is part of the contract: the same seed must produce the same
//! addresses across restarts, processes and implementations, so that a host
//! keeps converging on the address it used before.

use std::net::Ipv4Addr;

/// The 169.254.0.0/16 link-local network
pub const LINK_LOCAL_NETWORK: u32 = 0xa9fe_0000;

/// Lowest address the engine will select or accept (169.254.1.0)
pub const FIRST_USABLE: Ipv4Addr = Ipv4Addr::new(169, 254, 1, 0);

/// Highest address the engine will select or accept (169.254.254.255)
pub const LAST_USABLE: Ipv4Addr = Ipv4Addr::new(169, 254, 254, 255);

const FIRST_USABLE_OFFSET: u16 = 0x0100;
const LAST_USABLE_OFFSET: u16 = 0xfeff;

const RAND48_MULTIPLIER: u64 = 0x5_deec_e66d;
const RAND48_ADDEND: u64 = 0xb;
const RAND48_MASK: u64 = (1 << 48) - 1;

/// Check whether `addr` lies in the usable link-local range
pub fn is_usable(addr: Ipv4Addr) -> bool {
    let value = u32::from(addr);
    value >= LINK_LOCAL_NETWORK | FIRST_USABLE_OFFSET as u32
        && value <= LINK_LOCAL_NETWORK | LAST_USABLE_OFFSET as u32
}

/// drand48 generator state: `x' = (a * x + c) mod 2^48`
#[derive(Debug, Clone, PartialEq, Eq)]
struct Rand48 {
    x: u64,
}

impl Rand48 {
    /// Seed from the low 48 bits of `seed`.
    ///
    /// This is what `seed48` does when handed the first three 16-bit words
    /// of a little-endian 64-bit value.
    fn new(seed: u64) -> Self {
        Self {
            x: seed & RAND48_MASK,
        }
    }

    /// `mrand48`: the high 32 bits of the next state, as a signed value
    fn next_i32(&mut self) -> i32 {
        self.x = RAND48_MULTIPLIER
            .wrapping_mul(self.x)
            .wrapping_add(RAND48_ADDEND)
            & RAND48_MASK;
        (self.x >> 16) as u32 as i32
    }
}

/// Deterministic candidate address generator
///
/// Each call to [`AddressSelector::next_address`] draws from the generator,
/// folds the high half of the draw onto the low half, and uses the result as
/// an offset into 169.254.0.0/16. Offsets in the reserved ranges are thrown
/// away and redrawn.
///
/// # Example
///
/// ```
/// use ipv4ll_core::AddressSelector;
/// use std::net::Ipv4Addr;
///
/// let mut selector = AddressSelector::new(0);
/// assert_eq!(selector.next_address(), Ipv4Addr::new(169, 254, 148, 109));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressSelector {
    state: Rand48,
}

impl AddressSelector {
    /// Create a selector for the given enumeration seed
    pub fn new(enumeration: u64) -> Self {
        Self {
            state: Rand48::new(enumeration),
        }
    }

    /// Draw the next usable candidate
    pub fn next_address(&mut self) -> Ipv4Addr {
        loop {
            let draw = self.state.next_i32();
            let offset = (draw ^ (draw >> 16)) as u16;

            if !(FIRST_USABLE_OFFSET..=LAST_USABLE_OFFSET).contains(&offset) {
                continue;
            }

            return Ipv4Addr::from(LINK_LOCAL_NETWORK | offset as u32);
        }
    }
}

impl Default for AddressSelector {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Iterator for AddressSelector {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Ipv4Addr> {
        Some(self.next_address())
    }
}
