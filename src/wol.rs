use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const SYNCHRONIZATION_SCHEME: [u8; 6] = [0xff; 6];
const MAC_REPETITIONS: usize = 16;
// Shortest string that can hold six two-digit groups and five separators.
const MIN_MAC_STR_LEN: usize = 17;

pub const MAGIC_PACKET_LEN: usize = SYNCHRONIZATION_SCHEME.len() + MAC_REPETITIONS * 6;

#[derive(Error, Debug, PartialEq)]
pub enum ParseError {
    #[error("MAC address {0:?} is shorter than 17 characters")]
    TooShort(String),
    #[error("MAC address {0:?} is not six colon-separated hex bytes")]
    BadFormat(String),
}

/// Hardware address of the machine to wake.
///
/// The all-zero address means no target has been configured and is never
/// put on the wire.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct MacAddress([u8; 6]);

impl MacAddress {
    pub const UNCONFIGURED: MacAddress = MacAddress([0; 6]);

    pub const fn new(octets: [u8; 6]) -> Self {
        MacAddress(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_unconfigured(&self) -> bool {
        *self == Self::UNCONFIGURED
    }
}

impl From<[u8; 6]> for MacAddress {
    fn from(octets: [u8; 6]) -> Self {
        MacAddress(octets)
    }
}

impl FromStr for MacAddress {
    type Err = ParseError;

    // Accepts exactly six groups of one or two hex digits, in either case.
    // Together with the length floor this only admits the canonical layout.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() < MIN_MAC_STR_LEN {
            return Err(ParseError::TooShort(s.to_string()));
        }
        let bad_format = || ParseError::BadFormat(s.to_string());
        let mut groups = s.split(':');
        let mut octets = [0u8; 6];
        for octet in octets.iter_mut() {
            let group = groups.next().ok_or_else(bad_format)?;
            if group.is_empty()
                || group.len() > 2
                || !group.bytes().all(|b| b.is_ascii_hexdigit())
            {
                return Err(bad_format());
            }
            *octet = u8::from_str_radix(group, 16).map_err(|_| bad_format())?;
        }
        if groups.next().is_some() {
            return Err(bad_format());
        }
        Ok(MacAddress(octets))
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            a, b, c, d, e, g
        )
    }
}

/// Builds the payload a WoL listener looks for: six `0xff` bytes followed by
/// the target address sixteen times.
pub fn magic_packet(mac: &MacAddress) -> [u8; MAGIC_PACKET_LEN] {
    let mut packet = [0u8; MAGIC_PACKET_LEN];
    let (sync, body) = packet.split_at_mut(SYNCHRONIZATION_SCHEME.len());
    sync.copy_from_slice(&SYNCHRONIZATION_SCHEME);
    for chunk in body.chunks_exact_mut(mac.0.len()) {
        chunk.copy_from_slice(&mac.0);
    }
    packet
}
