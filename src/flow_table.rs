//! Turning compiled rule tables into ordered outbound work for one switch.

use std::collections::VecDeque;

use log::trace;

use crate::openflow0x01::message::Message;
use crate::openflow0x01::{PacketOut, Payload};
use crate::policy::{Rule, SwitchId};

/// One unit of work waiting to go out to a switch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundEntry {
    RuleInstall(Rule),
    /// Everything queued before this must be applied before anything after it.
    Barrier,
    PacketOut(PacketOut),
}

impl OutboundEntry {
    /// The message this entry is sent as.
    pub fn to_message(&self) -> Message {
        match *self {
            OutboundEntry::RuleInstall(ref rule) => Message::FlowMod(rule.to_flow_mod()),
            OutboundEntry::Barrier => Message::BarrierRequest,
            OutboundEntry::PacketOut(ref po) => Message::PacketOut(po.clone()),
        }
    }
}

/// The full installation sequence for `rules`: one install per rule, in the
/// order given, then a single barrier.
///
/// Tables are never diffed. Re-adding a rule with the same match and priority
/// overwrites the switch's entry, so replaying a whole table is harmless.
pub fn build_install_sequence(sw: SwitchId, rules: Vec<Rule>) -> Vec<OutboundEntry> {
    trace!("switch {:#x}: queueing {} rule(s) and a barrier", sw, rules.len());
    let mut entries: Vec<OutboundEntry> = rules.into_iter().map(OutboundEntry::RuleInstall).collect();
    entries.push(OutboundEntry::Barrier);
    entries
}

/// FIFO of outbound work for one switch.
#[derive(Clone, Debug, Default)]
pub struct OutboundQueue {
    entries: VecDeque<OutboundEntry>,
}

impl OutboundQueue {
    pub fn new() -> OutboundQueue {
        OutboundQueue::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push_back(&mut self, entry: OutboundEntry) {
        self.entries.push_back(entry);
    }

    pub fn extend<I: IntoIterator<Item = OutboundEntry>>(&mut self, entries: I) {
        self.entries.extend(entries);
    }

    /// Return an entry that could not be sent, keeping its place.
    pub fn push_front(&mut self, entry: OutboundEntry) {
        self.entries.push_front(entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Take the next entry to send.
    ///
    /// A packet-out for a buffered packet absorbs the packet-outs directly
    /// behind it that release the same buffer from the same in port, so the
    /// switch sees one message with the concatenated actions.
    pub fn pop_consolidated(&mut self) -> Option<OutboundEntry> {
        let mut head = match self.entries.pop_front()? {
            OutboundEntry::PacketOut(po) => po,
            other => return Some(other),
        };
        if let Some(buffer_id) = head.output_payload.buffer_id() {
            while let Some(OutboundEntry::PacketOut(next)) = self.entries.front() {
                if !same_buffer(buffer_id, head.port_id, next) {
                    break;
                }
                if let Some(OutboundEntry::PacketOut(next)) = self.entries.pop_front() {
                    head.apply_actions.extend(next.apply_actions);
                }
            }
        }
        Some(OutboundEntry::PacketOut(head))
    }
}

fn same_buffer(buffer_id: u32, port_id: Option<u16>, po: &PacketOut) -> bool {
    match po.output_payload {
        Payload::Buffered(id, _) => id == buffer_id && po.port_id == port_id,
        Payload::NotBuffered(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openflow0x01::{Action, FlowModCmd, Pattern, PseudoPort, Timeout};

    fn output(p: u16) -> Action {
        Action::Output(PseudoPort::PhysicalPort(p))
    }

    fn buffered(id: u32, in_port: u16, port: u16) -> OutboundEntry {
        OutboundEntry::PacketOut(PacketOut {
            output_payload: Payload::Buffered(id, vec![]),
            port_id: Some(in_port),
            apply_actions: vec![output(port)],
        })
    }

    #[test]
    fn sequence_keeps_order_and_ends_with_one_barrier() {
        let rules = vec![
            Rule::new(5, Pattern::match_all(), vec![output(1)]),
            Rule::new(50, Pattern::match_all(), vec![output(2)]),
        ];
        let seq = build_install_sequence(1, rules.clone());
        assert_eq!(
            seq,
            vec![
                OutboundEntry::RuleInstall(rules[0].clone()),
                OutboundEntry::RuleInstall(rules[1].clone()),
                OutboundEntry::Barrier,
            ]
        );
        assert_eq!(build_install_sequence(1, vec![]), vec![OutboundEntry::Barrier]);
    }

    #[test]
    fn rule_installs_are_permanent_adds() {
        let rule = Rule::new(7, Pattern::match_all(), vec![output(3)]);
        match OutboundEntry::RuleInstall(rule).to_message() {
            Message::FlowMod(fm) => {
                assert_eq!(fm.command, FlowModCmd::AddFlow);
                assert_eq!(fm.priority, 7);
                assert_eq!(fm.idle_timeout, Timeout::Permanent);
                assert_eq!(fm.hard_timeout, Timeout::Permanent);
                assert_eq!(fm.apply_to_packet, None);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(OutboundEntry::Barrier.to_message(), Message::BarrierRequest);
    }

    #[test]
    fn merges_adjacent_packet_outs_for_one_buffer() {
        let mut queue = OutboundQueue::new();
        queue.extend(vec![
            buffered(9, 1, 2),
            buffered(9, 1, 3),
            buffered(9, 4, 5),
            OutboundEntry::Barrier,
            buffered(9, 4, 6),
        ]);
        match queue.pop_consolidated() {
            Some(OutboundEntry::PacketOut(po)) => {
                assert_eq!(po.apply_actions, vec![output(2), output(3)]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(queue.pop_consolidated(), Some(buffered(9, 4, 5)));
        assert_eq!(queue.pop_consolidated(), Some(OutboundEntry::Barrier));
        assert_eq!(queue.pop_consolidated(), Some(buffered(9, 4, 6)));
        assert_eq!(queue.pop_consolidated(), None);
    }

    #[test]
    fn unbuffered_packet_outs_are_never_merged() {
        let raw = |port| {
            OutboundEntry::PacketOut(PacketOut {
                output_payload: Payload::NotBuffered(vec![1, 2, 3]),
                port_id: Some(1),
                apply_actions: vec![output(port)],
            })
        };
        let mut queue = OutboundQueue::new();
        queue.extend(vec![raw(2), raw(3)]);
        assert_eq!(queue.pop_consolidated(), Some(raw(2)));
        assert_eq!(queue.pop_consolidated(), Some(raw(3)));
    }

    #[test]
    fn push_front_restores_position() {
        let mut queue = OutboundQueue::new();
        queue.extend(vec![OutboundEntry::Barrier, buffered(1, 1, 1)]);
        let first = queue.pop_consolidated().unwrap();
        queue.push_front(first);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_consolidated(), Some(OutboundEntry::Barrier));
    }
}
