//! The boundary to policy compilation and reactive packet handling.
//!
//! A policy compiles a priority-ordered rule table per switch and decides what
//! to do with packets switches send up. The controller treats compilation as
//! opaque: whatever `compile` returns is installed as-is.

use std::collections::HashMap;

use crate::error::PolicyError;
use crate::openflow0x01::message::add_flow;
use crate::openflow0x01::{Action, FlowMod, Mask, PacketIn, PacketOut, Pattern, PseudoPort, SwitchFeatures};
use crate::packet::Packet;

/// Stable identifier of one switch, the OpenFlow datapath id.
pub type SwitchId = u64;

/// A priority-ordered match/action pair installed in a switch's flow table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub priority: u16,
    pub pattern: Pattern,
    pub actions: Vec<Action>,
}

impl Rule {
    pub fn new(priority: u16, pattern: Pattern, actions: Vec<Action>) -> Rule {
        Rule {
            priority,
            pattern,
            actions,
        }
    }

    /// The `FlowMod` that adds this rule permanently.
    pub fn to_flow_mod(&self) -> FlowMod {
        add_flow(self.priority, self.pattern.clone(), self.actions.clone())
    }

    /// Whether a packet that arrived on `in_port` falls under this rule.
    pub fn matches(&self, in_port: u16, pkt: &Packet) -> bool {
        pattern_matches(&self.pattern, in_port, pkt)
    }
}

fn prefix_matches(m: &Mask<u32>, addr: u32) -> bool {
    let bits = m.mask.unwrap_or(32).min(32);
    if bits == 0 {
        return true;
    }
    let mask = u32::MAX << (32 - bits);
    (m.value & mask) == (addr & mask)
}

/// Evaluate `pattern` against a parsed packet.
pub fn pattern_matches(pattern: &Pattern, in_port: u16, pkt: &Packet) -> bool {
    fn field<T: PartialEq>(want: Option<T>, have: Option<T>) -> bool {
        match want {
            None => true,
            Some(w) => have == Some(w),
        }
    }

    let ip = pkt.ip();
    let ports = ip.and_then(|ip| ip.ports());
    let dl_vlan_ok = match pattern.dl_vlan {
        None => true,
        Some(want) => want == pkt.dl_vlan,
    };
    let nw_ok = |m: &Option<Mask<u32>>, pick: fn(&crate::packet::Ip) -> u32| match (m, ip) {
        (None, _) => true,
        (Some(m), Some(ip)) => prefix_matches(m, pick(ip)),
        (Some(_), None) => false,
    };

    field(pattern.in_port, Some(in_port))
        && field(pattern.dl_src, Some(pkt.dl_src))
        && field(pattern.dl_dst, Some(pkt.dl_dst))
        && field(pattern.dl_typ, Some(pkt.dl_typ))
        && dl_vlan_ok
        && field(pattern.dl_vlan_pcp, pkt.dl_vlan.map(|_| pkt.dl_vlan_pcp))
        && nw_ok(&pattern.nw_src, |ip| ip.src)
        && nw_ok(&pattern.nw_dst, |ip| ip.dst)
        && field(pattern.nw_proto, ip.map(|ip| ip.proto))
        && field(pattern.nw_tos, ip.map(|ip| ip.tos))
        && field(pattern.tp_src, ports.map(|p| p.0))
        && field(pattern.tp_dst, ports.map(|p| p.1))
}

/// What a policy wants done about one packet-in. Exactly one outcome per packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Reaction {
    /// Nothing is sent.
    Drop,
    /// Send the packet back out of the switch it came from.
    PacketOut(PacketOut),
    /// The rule tables of `switches` changed and must be reinstalled, after
    /// which `packet_out` releases the triggering packet.
    PolicyChanged {
        switches: Vec<SwitchId>,
        packet_out: PacketOut,
    },
}

/// A policy driven by the controller event loop.
///
/// All methods are called from the single controller thread, so
/// implementations may keep plain mutable state.
pub trait ReactivePolicy {
    /// Compile the full flow table for `sw`, in installation order (highest
    /// priority first).
    fn compile(&self, sw: SwitchId) -> Vec<Rule>;

    /// React to a packet sent up by `sw`.
    fn packet_in(&mut self, sw: SwitchId, pkt: &PacketIn) -> Result<Reaction, PolicyError>;

    /// Invoked once a switch completes its handshake, before its table is compiled.
    fn switch_connected(&mut self, _sw: SwitchId, _features: &SwitchFeatures) {}

    fn switch_disconnected(&mut self, _sw: SwitchId) {}
}

/// A fixed per-switch rule table.
///
/// Packet-ins are classified against the same table: the highest-priority
/// matching rule's actions (minus any output back to the controller) are
/// applied with a `PacketOut`.
#[derive(Clone, Debug, Default)]
pub struct StaticPolicy {
    rules: HashMap<SwitchId, Vec<Rule>>,
}

impl StaticPolicy {
    pub fn new() -> StaticPolicy {
        StaticPolicy::default()
    }

    pub fn add_rule(&mut self, sw: SwitchId, rule: Rule) {
        self.rules.entry(sw).or_default().push(rule);
    }

    /// Classify a packet without touching any state.
    pub fn classify(&self, sw: SwitchId, pkt: &PacketIn) -> Reaction {
        let parsed = match Packet::parse(pkt.input_payload.bytes()) {
            Some(parsed) => parsed,
            None => return Reaction::Drop,
        };
        let rule = self
            .compile(sw)
            .into_iter()
            .find(|rule| rule.matches(pkt.port, &parsed));
        let actions: Vec<Action> = match rule {
            None => return Reaction::Drop,
            Some(rule) => rule
                .actions
                .into_iter()
                .filter(|act| !matches!(act, Action::Output(PseudoPort::Controller(_))))
                .collect(),
        };
        if actions.is_empty() {
            return Reaction::Drop;
        }
        Reaction::PacketOut(PacketOut {
            output_payload: pkt.input_payload.clone(),
            port_id: Some(pkt.port),
            apply_actions: actions,
        })
    }
}

impl ReactivePolicy for StaticPolicy {
    fn compile(&self, sw: SwitchId) -> Vec<Rule> {
        let mut rules = self.rules.get(&sw).cloned().unwrap_or_default();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        rules
    }

    fn packet_in(&mut self, sw: SwitchId, pkt: &PacketIn) -> Result<Reaction, PolicyError> {
        Ok(self.classify(sw, pkt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openflow0x01::{PacketInReason, Payload};
    use crate::packet::tests::frame;
    use crate::packet::{ETH_TYP_IP, IP_PROTO_TCP};

    fn output(p: u16) -> Vec<Action> {
        vec![Action::Output(PseudoPort::PhysicalPort(p))]
    }

    fn packet_in(port: u16, data: Vec<u8>) -> PacketIn {
        PacketIn {
            total_len: data.len() as u16,
            input_payload: Payload::NotBuffered(data),
            port,
            reason: PacketInReason::NoMatch,
        }
    }

    #[test]
    fn compile_orders_by_decreasing_priority_stably() {
        let mut policy = StaticPolicy::new();
        policy.add_rule(1, Rule::new(10, Pattern::match_all(), output(1)));
        policy.add_rule(1, Rule::new(50, Pattern::match_all(), output(2)));
        policy.add_rule(1, Rule::new(10, Pattern::match_all(), output(3)));
        let prios: Vec<(u16, Vec<Action>)> = policy
            .compile(1)
            .into_iter()
            .map(|r| (r.priority, r.actions))
            .collect();
        assert_eq!(prios, vec![(50, output(2)), (10, output(1)), (10, output(3))]);
        assert!(policy.compile(2).is_empty());
    }

    #[test]
    fn classify_uses_highest_matching_rule() {
        let mut policy = StaticPolicy::new();
        let mut web = Pattern::match_all();
        web.dl_typ = Some(ETH_TYP_IP);
        web.nw_proto = Some(IP_PROTO_TCP);
        web.tp_dst = Some(80);
        policy.add_rule(7, Rule::new(100, web, output(4)));
        let mut from_one = Pattern::match_all();
        from_one.in_port = Some(1);
        policy.add_rule(7, Rule::new(10, from_one, output(2)));

        let http = frame(IP_PROTO_TCP, (0x0a00_0001, 1234), (0x0a00_0002, 80), b"");
        match policy.packet_in(7, &packet_in(1, http)).unwrap() {
            Reaction::PacketOut(po) => {
                assert_eq!(po.apply_actions, output(4));
                assert_eq!(po.port_id, Some(1));
            }
            other => panic!("unexpected {:?}", other),
        }

        let ssh = frame(IP_PROTO_TCP, (0x0a00_0001, 1234), (0x0a00_0002, 22), b"");
        match policy.packet_in(7, &packet_in(1, ssh.clone())).unwrap() {
            Reaction::PacketOut(po) => assert_eq!(po.apply_actions, output(2)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(policy.packet_in(7, &packet_in(3, ssh)).unwrap(), Reaction::Drop);
    }

    #[test]
    fn controller_only_rules_drop() {
        let mut policy = StaticPolicy::new();
        policy.add_rule(
            1,
            Rule::new(1, Pattern::match_all(), vec![Action::Output(PseudoPort::Controller(128))]),
        );
        let pkt = frame(IP_PROTO_TCP, (1, 1), (2, 2), b"");
        assert_eq!(policy.packet_in(1, &packet_in(1, pkt)).unwrap(), Reaction::Drop);
    }

    #[test]
    fn prefix_match() {
        let net = Mask {
            value: 0x0a00_0000,
            mask: Some(8),
        };
        assert!(prefix_matches(&net, 0x0a01_0203));
        assert!(!prefix_matches(&net, 0x0b00_0000));
        let host = Mask {
            value: 0x0a00_0005,
            mask: None,
        };
        assert!(prefix_matches(&host, 0x0a00_0005));
        assert!(!prefix_matches(&host, 0x0a00_0006));
    }
}
