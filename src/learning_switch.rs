use std::collections::HashSet;
use std::io::Write;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::SessionError;
use crate::flow_installer::{self, FlowRule};
use crate::mac_table::{DatapathId, MacTable};
use crate::ofp_controller::openflow0x04::{OF0x04Controller, OfpMessageWriter};
use crate::openflow0x04::{Action, PacketIn, PacketOut, PseudoPort, SwitchFeatures};
use crate::packet::{EthernetFrame, MacAddr, ETH_TYP_LLDP};

/// Implements L2 learning switch functionality. Switches forward unmatched
/// packets to the controller, which examines the frame header and learns the
/// source-to-port mapping. Once the controller knows the destination's
/// location it pushes a flow entry down to the switch that matches traffic
/// between the packet's source and destination, and otherwise floods.
///
/// Abstractly the switch has two distinct halves:
///
///  - a _learning_ half that builds a map from host MAC addresses to the
///    switch port on which they were last seen, and
///  - a _routing_ half that resolves each packet-in: directed output with a
///    flow install when the destination is known, flood otherwise.
pub struct LearningSwitch {
    known_hosts: MacTable,
    /// (src, dst, in_port) triples that already produced a flow rule, per
    /// device. A triple is issued at most one rule; a fresh install only
    /// happens after the device's state is forgotten.
    issued: DashMap<DatapathId, HashSet<(MacAddr, MacAddr, u32)>>,
}

impl LearningSwitch {
    pub fn new() -> LearningSwitch {
        LearningSwitch {
            known_hosts: MacTable::new(),
            issued: DashMap::new(),
        }
    }

    /// The address-to-port mappings learned so far.
    pub fn known_hosts(&self) -> &MacTable {
        &self.known_hosts
    }

    /// Record the triple and report whether it had not produced a rule yet.
    fn first_issue(&self, sw: DatapathId, src: MacAddr, dst: MacAddr, in_port: u32) -> bool {
        self.issued.entry(sw).or_default().insert((src, dst, in_port))
    }

    fn routing_packet_in<S: Write>(
        &self,
        sw: DatapathId,
        src: MacAddr,
        dst: MacAddr,
        pkt: PacketIn,
        writer: &mut OfpMessageWriter<S>,
    ) -> Result<(), SessionError> {
        let in_port = pkt.port;
        match self.known_hosts.lookup(sw, dst) {
            Some(out_port) => {
                let buffer = pkt.buffer_id();
                if self.first_issue(sw, src, dst, in_port) {
                    let mut rule = FlowRule::directed(in_port, src, dst, out_port);
                    rule.buffer = buffer;
                    flow_installer::install(writer, sw, rule)?;
                    if buffer.is_some() {
                        // the device resumes the buffered frame through the
                        // rule just installed; no packet-out needed
                        return Ok(());
                    }
                }
                let pkt_out = PacketOut {
                    output_payload: pkt.input_payload,
                    port_id: Some(in_port),
                    apply_actions: vec![Action::Output(PseudoPort::PhysicalPort(out_port))],
                };
                Self::send_packet_out(writer, pkt_out)
            }
            None => {
                info!(
                    dpid = sw,
                    dst = %dst,
                    known = self.known_hosts.len(sw),
                    "destination unknown; flooding"
                );
                let pkt_out = PacketOut {
                    output_payload: pkt.input_payload,
                    port_id: Some(in_port),
                    apply_actions: vec![Action::Output(PseudoPort::Flood)],
                };
                Self::send_packet_out(writer, pkt_out)
            }
        }
    }
}

impl Default for LearningSwitch {
    fn default() -> LearningSwitch {
        LearningSwitch::new()
    }
}

impl OF0x04Controller for LearningSwitch {
    fn switch_connected<S: Write>(
        &self,
        sw: DatapathId,
        _feats: SwitchFeatures,
        writer: &mut OfpMessageWriter<S>,
    ) -> Result<(), SessionError> {
        // a reconnecting device comes back with an empty flow table; start
        // its learning state from scratch as well
        self.known_hosts.forget(sw);
        self.issued.remove(&sw);
        flow_installer::install(writer, sw, FlowRule::table_miss())
    }

    fn switch_disconnected(&self, sw: DatapathId) {
        self.known_hosts.forget(sw);
        self.issued.remove(&sw);
    }

    fn packet_in<S: Write>(
        &self,
        sw: DatapathId,
        _xid: u32,
        pkt: PacketIn,
        writer: &mut OfpMessageWriter<S>,
    ) -> Result<(), SessionError> {
        if pkt.is_truncated() {
            // the device's miss_send_len clipped the report
            debug!(
                dpid = sw,
                received = pkt.input_payload.bytes().len(),
                total_len = pkt.total_len,
                "packet truncated by device"
            );
        }
        let (src, dst) = {
            let frame = EthernetFrame::parse(pkt.input_payload.bytes())?;
            if frame.dl_typ() == ETH_TYP_LLDP {
                // discovery frames are never learned from or forwarded
                return Ok(());
            }
            (frame.dl_src(), frame.dl_dst())
        };
        debug!(dpid = sw, src = %src, dst = %dst, in_port = pkt.port, "packet in");
        self.known_hosts.learn(sw, src, pkt.port);
        info!(dpid = sw, mac = %src, port = pkt.port, "learned mapping");
        self.routing_packet_in(sw, src, dst, pkt, writer)
    }
}
