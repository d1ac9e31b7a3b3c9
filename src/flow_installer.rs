//! Translation of flow-rule descriptors into flow-mod messages.
//!
//! No state lives here; the forwarding decision engine builds a `FlowRule`
//! and this module turns it into wire form and hands it to the device's
//! writer.

use std::io::Write;

use tracing::info;

use crate::error::SessionError;
use crate::mac_table::DatapathId;
use crate::ofp_controller::openflow0x04::OfpMessageWriter;
use crate::openflow0x04::message::Message;
use crate::openflow0x04::{
    Action, FlowMod, FlowModCmd, Pattern, PseudoPort, Timeout, OFPCML_NO_BUFFER,
};
use crate::packet::MacAddr;

/// Priority of the catch-all rule routing unmatched traffic to the
/// controller.
pub const TABLE_MISS_PRIORITY: u16 = 0;

/// Priority of learned forwarding rules. Strictly above the table-miss rule
/// so directed traffic never reaches the controller again.
pub const LEARNED_RULE_PRIORITY: u16 = 1;

/// Everything needed to install one forwarding rule on a device.
///
/// Built by the forwarding decision engine and never mutated after issuance;
/// superseding a rule means issuing a fresh one.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FlowRule {
    pub priority: u16,
    pub in_port: Option<u32>,
    pub dl_dst: Option<MacAddr>,
    pub dl_src: Option<MacAddr>,
    pub action: Action,
    /// Device-held buffer to run through the new rule, if the triggering
    /// packet-in carried one.
    pub buffer: Option<u32>,
}

impl FlowRule {
    /// The table-miss rule: empty match, whole packet to the controller with
    /// no device-side buffering.
    pub fn table_miss() -> FlowRule {
        FlowRule {
            priority: TABLE_MISS_PRIORITY,
            in_port: None,
            dl_dst: None,
            dl_src: None,
            action: Action::Output(PseudoPort::Controller(OFPCML_NO_BUFFER)),
            buffer: None,
        }
    }

    /// An exact rule switching frames from `dl_src` to `dl_dst` arriving on
    /// `in_port` out of `out_port`.
    pub fn directed(in_port: u32, dl_src: MacAddr, dl_dst: MacAddr, out_port: u32) -> FlowRule {
        FlowRule {
            priority: LEARNED_RULE_PRIORITY,
            in_port: Some(in_port),
            dl_dst: Some(dl_dst),
            dl_src: Some(dl_src),
            action: Action::Output(PseudoPort::PhysicalPort(out_port)),
            buffer: None,
        }
    }

    fn into_flow_mod(self) -> FlowMod {
        FlowMod {
            command: FlowModCmd::AddFlow,
            table_id: 0,
            pattern: Pattern {
                in_port: self.in_port,
                dl_dst: self.dl_dst,
                dl_src: self.dl_src,
            },
            priority: self.priority,
            actions: vec![self.action],
            cookie: 0,
            idle_timeout: Timeout::Permanent,
            hard_timeout: Timeout::Permanent,
            notify_when_removed: false,
            apply_to_packet: self.buffer,
            out_port: None,
            check_overlap: false,
        }
    }
}

/// Marshal `rule` into a flow-mod and send it to the device behind `writer`.
///
/// An encode failure is reported to the caller and nothing is sent; transport
/// failures propagate and close the session.
pub fn install<S: Write>(
    writer: &mut OfpMessageWriter<S>,
    sw: DatapathId,
    rule: FlowRule,
) -> Result<(), SessionError> {
    writer.send(Message::FlowMod(rule.into_flow_mod()))?;
    info!(
        dpid = sw,
        priority = rule.priority,
        in_port = ?rule.in_port,
        dl_dst = ?rule.dl_dst,
        dl_src = ?rule.dl_src,
        action = ?rule.action,
        buffered = rule.buffer.is_some(),
        "flow-mod issued"
    );
    Ok(())
}
