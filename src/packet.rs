use std::fmt;
use std::io;

use crate::error::MalformedMessage;

/// Reserved ethertype for link-discovery (LLDP) frames. Never learned from,
/// never forwarded by the controller.
pub const ETH_TYP_LLDP: u16 = 0x88cc;

/// A 48-bit IEEE 802 MAC address.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            m[0], m[1], m[2], m[3], m[4], m[5]
        )
    }
}

impl fmt::Debug for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Borrowed view of an Ethernet II header at the front of a packet-in
/// payload.
///
/// Only the addresses and the ethertype are decoded; the rest of the frame is
/// left untouched so forwarding a packet never pays for a full protocol-stack
/// parse.
pub struct EthernetFrame<'a> {
    bytes: &'a [u8],
}

const ETH_HEADER_LEN: usize = 14;

impl<'a> EthernetFrame<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<EthernetFrame<'a>, MalformedMessage> {
        if bytes.len() < ETH_HEADER_LEN {
            return Err(MalformedMessage::new(
                "ethernet frame",
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} bytes is shorter than an ethernet header", bytes.len()),
                ),
            ));
        }
        Ok(EthernetFrame { bytes })
    }

    pub fn dl_dst(&self) -> MacAddr {
        let mut mac = [0; 6];
        mac.copy_from_slice(&self.bytes[0..6]);
        MacAddr(mac)
    }

    pub fn dl_src(&self) -> MacAddr {
        let mut mac = [0; 6];
        mac.copy_from_slice(&self.bytes[6..12]);
        MacAddr(mac)
    }

    /// The outer ethertype. VLAN-tagged frames report 0x8100; the tagged
    /// inner type is not examined.
    pub fn dl_typ(&self) -> u16 {
        u16::from_be_bytes([self.bytes[12], self.bytes[13]])
    }
}
