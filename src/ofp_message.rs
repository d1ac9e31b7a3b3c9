use crate::error::{EncodeFailure, MalformedMessage};
use crate::ofp_header::OfpHeader;

/// OpenFlow Message
///
/// Version-agnostic API for handling OpenFlow messages at the byte-buffer
/// level.
pub trait OfpMessage: Sized {
    /// Return a marshaled buffer containing an OpenFlow header and the
    /// message `msg`.
    fn marshal(xid: u32, msg: Self) -> Result<Vec<u8>, EncodeFailure>;
    /// Return a pair `(u32, OfpMessage)` of the transaction id and OpenFlow
    /// message parsed from the given OpenFlow header `header` and body `buf`.
    fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(u32, Self), MalformedMessage>;
}
