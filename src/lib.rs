//! A reactive OpenFlow 1.0 controller with a dynamic NAT policy.
//!
//! Switches connect over TCP and are driven by a single event loop
//! ([`ofp_controller::Controller`]) that installs whatever rule tables a
//! [`policy::ReactivePolicy`] compiles and relays its reactions to packet-ins.

mod bits;
pub mod config;
pub mod connection;
pub mod error;
pub mod flow_table;
pub mod nat;
pub mod ofp_controller;
pub mod ofp_header;
pub mod ofp_message;
pub mod openflow0x01;
pub mod packet;
pub mod policy;
pub mod registry;

pub use error::{Error, Result};
