//! OpenFlow 0x04 protocol plumbing and a learning-switch controller.
//!
//! The crate splits into a wire layer (`ofp_header`, `ofp_message`,
//! `openflow0x04`) translating between socket bytes and typed messages, and a
//! control layer (`ofp_controller`, `learning_switch`, `mac_table`,
//! `flow_installer`) that runs one session per connected switch and installs
//! forwarding state learned from observed traffic.

mod bits;
pub mod error;
pub mod flow_installer;
pub mod learning_switch;
pub mod mac_table;
pub mod ofp_controller;
pub mod ofp_header;
pub mod ofp_message;
pub mod openflow0x04;
pub mod packet;
