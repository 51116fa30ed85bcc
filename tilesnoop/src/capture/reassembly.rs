//! Minimal in-order TCP reassembly.
//!
//! Only IPv4 connections opened with a SYN towards an allow-listed server
//! are followed. Each direction delivers payload strictly in sequence
//! order: retransmitted bytes are trimmed, segments arriving ahead of the
//! expected sequence number are held back up to a bound, and a flow whose
//! hold-back queue overflows is closed.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use bytes::Bytes;
use etherparse::{NetSlice, SlicedPacket, TcpSlice, TransportSlice};
use tracing::{debug, trace, warn};

use super::source::{LinkType, RawPacket};
use super::{CloseReason, StreamEvent};
use crate::config::CaptureConfig;
use crate::flow::{Direction, FlowKey};
use crate::hosts::ServerAllowList;

/// Length of the Linux cooked capture header.
const SLL_HEADER_LEN: usize = 16;

/// Counters kept by the reassembler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub packets: u64,
    /// Packets that were not IPv4/TCP or belonged to no followed flow.
    pub ignored: u64,
    pub flows_opened: u64,
    pub flows_closed: u64,
    /// SYNs refused because the flow table was full.
    pub flows_rejected: u64,
    pub out_of_order: u64,
    pub retransmitted_bytes: u64,
}

/// Signed distance from `b` to `a` in sequence space.
fn seq_diff(a: u32, b: u32) -> i32 {
    a.wrapping_sub(b) as i32
}

#[derive(Debug, Default)]
struct HalfStream {
    next_seq: Option<u32>,
    held: Vec<(u32, Vec<u8>)>,
    /// Sequence number the peer's FIN occupies.
    fin_seq: Option<u32>,
}

impl HalfStream {
    /// Accept one segment, returning the bytes now deliverable in order.
    /// `Err(())` means the hold-back queue overflowed.
    fn accept(
        &mut self,
        seq: u32,
        payload: &[u8],
        limit: usize,
        stats: &mut ReassemblyStats,
    ) -> Result<Vec<u8>, ()> {
        let next = *self.next_seq.get_or_insert(seq);
        let mut out = Vec::new();

        if seq_diff(seq, next) > 0 {
            if self.held.len() >= limit {
                return Err(());
            }
            stats.out_of_order += 1;
            self.held.push((seq, payload.to_vec()));
            return Ok(out);
        }

        self.deliver(seq, payload, &mut out, stats);

        // Release held segments that have become contiguous
        while let Some(next) = self.next_seq {
            let Some(index) = self
                .held
                .iter()
                .position(|(held_seq, _)| seq_diff(*held_seq, next) <= 0)
            else {
                break;
            };
            let (held_seq, data) = self.held.swap_remove(index);
            self.deliver(held_seq, &data, &mut out, stats);
        }
        Ok(out)
    }

    /// Record a FIN carried by the segment starting at `seq`.
    fn mark_fin(&mut self, seq: u32, payload_len: usize) {
        self.next_seq.get_or_insert(seq);
        self.fin_seq = Some(seq.wrapping_add(payload_len as u32));
    }

    /// Whether everything up to the FIN has been delivered.
    fn fin_reached(&self) -> bool {
        match (self.fin_seq, self.next_seq) {
            (Some(fin), Some(next)) => seq_diff(next, fin) >= 0,
            _ => false,
        }
    }

    fn deliver(&mut self, seq: u32, payload: &[u8], out: &mut Vec<u8>, stats: &mut ReassemblyStats) {
        let Some(next) = self.next_seq else {
            return;
        };
        let overlap = seq_diff(next, seq).max(0) as usize;
        if overlap >= payload.len() {
            stats.retransmitted_bytes += payload.len() as u64;
            return;
        }
        stats.retransmitted_bytes += overlap as u64;
        let fresh = &payload[overlap..];
        out.extend_from_slice(fresh);
        self.next_seq = Some(next.wrapping_add(fresh.len() as u32));
    }
}

#[derive(Debug)]
struct FlowState {
    client: HalfStream,
    server: HalfStream,
    last_seen: u64,
}

impl FlowState {
    fn half(&mut self, direction: Direction) -> &mut HalfStream {
        match direction {
            Direction::ClientToServer => &mut self.client,
            Direction::ServerToClient => &mut self.server,
        }
    }
}

/// Follows allow-listed TCP connections and emits [`StreamEvent`]s.
#[derive(Debug)]
pub struct TcpReassembler {
    allow: ServerAllowList,
    link: LinkType,
    max_flows: usize,
    max_out_of_order: usize,
    idle_timeout: u64,
    flows: HashMap<FlowKey, FlowState>,
    last_sweep: u64,
    stats: ReassemblyStats,
}

impl TcpReassembler {
    pub fn new(allow: ServerAllowList, link: LinkType, config: &CaptureConfig) -> Self {
        Self {
            allow,
            link,
            max_flows: config.max_flows.max(1),
            max_out_of_order: config.max_out_of_order,
            idle_timeout: config.idle_timeout.as_secs().max(1),
            flows: HashMap::new(),
            last_sweep: 0,
            stats: ReassemblyStats::default(),
        }
    }

    /// Flows currently followed.
    pub fn active_flows(&self) -> usize {
        self.flows.len()
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Process one captured packet, appending resulting events to `out`.
    pub fn process(&mut self, packet: &RawPacket, out: &mut Vec<StreamEvent>) {
        self.stats.packets += 1;
        let now = packet.timestamp;

        match self.slice(&packet.data) {
            Some(sliced) => self.process_sliced(&sliced, now, out),
            None => self.stats.ignored += 1,
        }

        if now >= self.last_sweep.saturating_add(self.idle_timeout) {
            self.sweep(now, out);
        }
    }

    /// Close flows idle for longer than the timeout at time `now`.
    pub fn sweep(&mut self, now: u64, out: &mut Vec<StreamEvent>) {
        self.last_sweep = now;
        let timeout = self.idle_timeout;
        let mut idle: Vec<FlowKey> = self
            .flows
            .iter()
            .filter(|(_, state)| now.saturating_sub(state.last_seen) >= timeout)
            .map(|(key, _)| *key)
            .collect();
        idle.sort();
        for flow in idle {
            trace!(flow = %flow, "Flow timed out");
            self.close(flow, CloseReason::Timeout, now, out);
        }
    }

    /// Close every remaining flow at end of input.
    pub fn finish(&mut self, now: u64, out: &mut Vec<StreamEvent>) {
        let mut open: Vec<FlowKey> = self.flows.keys().copied().collect();
        open.sort();
        for flow in open {
            self.close(flow, CloseReason::EndOfInput, now, out);
        }
    }

    fn slice<'a>(&self, data: &'a [u8]) -> Option<SlicedPacket<'a>> {
        match self.link {
            LinkType::Ethernet => SlicedPacket::from_ethernet(data).ok(),
            LinkType::LinuxSll => SlicedPacket::from_ip(data.get(SLL_HEADER_LEN..)?).ok(),
            LinkType::RawIp => SlicedPacket::from_ip(data).ok(),
            LinkType::Other(_) => None,
        }
    }

    fn process_sliced(&mut self, sliced: &SlicedPacket<'_>, now: u64, out: &mut Vec<StreamEvent>) {
        let (src, dst) = match &sliced.net {
            Some(NetSlice::Ipv4(ipv4)) => {
                let header = ipv4.header();
                (header.source_addr(), header.destination_addr())
            }
            _ => {
                self.stats.ignored += 1;
                return;
            }
        };
        let Some(TransportSlice::Tcp(tcp)) = &sliced.transport else {
            self.stats.ignored += 1;
            return;
        };

        let Some((flow, direction)) = self.orient(src, dst, tcp) else {
            self.stats.ignored += 1;
            return;
        };

        if tcp.syn() && !tcp.ack() && direction.is_client() {
            self.open(flow, tcp.sequence_number(), now, out);
            return;
        }

        let max_out_of_order = self.max_out_of_order;
        let Some(state) = self.flows.get_mut(&flow) else {
            self.stats.ignored += 1;
            return;
        };
        state.last_seen = now;

        if tcp.rst() {
            self.close(flow, CloseReason::Reset, now, out);
            return;
        }

        let half = state.half(direction);
        if tcp.syn() {
            // SYN-ACK: server stream starts after its initial sequence
            half.next_seq = Some(tcp.sequence_number().wrapping_add(1));
            return;
        }

        let payload = tcp.payload();
        if !payload.is_empty() {
            match half.accept(tcp.sequence_number(), payload, max_out_of_order, &mut self.stats) {
                Ok(bytes) if !bytes.is_empty() => out.push(StreamEvent::Data {
                    flow,
                    direction,
                    timestamp: now,
                    bytes: Bytes::from(bytes),
                }),
                Ok(_) => {}
                Err(()) => {
                    warn!(flow = %flow, direction = %direction, "Out-of-order queue overflow, closing flow");
                    self.close(flow, CloseReason::Overflow, now, out);
                    return;
                }
            }
        }

        if tcp.fin() {
            half.mark_fin(tcp.sequence_number(), payload.len());
        }
        if state.client.fin_reached() && state.server.fin_reached() {
            self.close(flow, CloseReason::Fin, now, out);
        }
    }

    fn orient(&self, src: Ipv4Addr, dst: Ipv4Addr, tcp: &TcpSlice<'_>) -> Option<(FlowKey, Direction)> {
        let (sport, dport) = (tcp.source_port(), tcp.destination_port());
        if self.allow.matches(dst, dport) {
            Some((FlowKey::new(src, sport, dst, dport), Direction::ClientToServer))
        } else if self.allow.matches(src, sport) {
            Some((FlowKey::new(dst, dport, src, sport), Direction::ServerToClient))
        } else {
            None
        }
    }

    fn open(&mut self, flow: FlowKey, isn: u32, now: u64, out: &mut Vec<StreamEvent>) {
        if let Some(state) = self.flows.get_mut(&flow) {
            // Retransmitted SYN
            state.last_seen = now;
            return;
        }
        if self.flows.len() >= self.max_flows {
            self.stats.flows_rejected += 1;
            warn!(flow = %flow, max_flows = self.max_flows, "Flow table full, ignoring connection");
            return;
        }

        let state = FlowState {
            client: HalfStream {
                next_seq: Some(isn.wrapping_add(1)),
                ..HalfStream::default()
            },
            server: HalfStream::default(),
            last_seen: now,
        };
        self.flows.insert(flow, state);
        self.stats.flows_opened += 1;
        debug!(flow = %flow, "Flow opened");
        out.push(StreamEvent::Opened { flow, timestamp: now });
    }

    fn close(&mut self, flow: FlowKey, reason: CloseReason, now: u64, out: &mut Vec<StreamEvent>) {
        if self.flows.remove(&flow).is_some() {
            self.stats.flows_closed += 1;
            debug!(flow = %flow, reason = ?reason, "Flow closed");
            out.push(StreamEvent::Closed {
                flow,
                reason,
                timestamp: now,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;
    use std::time::Duration;

    const CLIENT: [u8; 4] = [192, 168, 1, 20];
    const SERVER: [u8; 4] = [10, 0, 0, 1];
    const CPORT: u16 = 51000;

    fn allow() -> ServerAllowList {
        ServerAllowList::new([Ipv4Addr::from(SERVER)], 443).unwrap()
    }

    fn reassembler() -> TcpReassembler {
        TcpReassembler::new(allow(), LinkType::RawIp, &CaptureConfig::default())
    }

    fn flow() -> FlowKey {
        FlowKey::new(Ipv4Addr::from(CLIENT), CPORT, Ipv4Addr::from(SERVER), 443)
    }

    #[derive(Default)]
    struct Flags {
        syn: bool,
        ack: bool,
        fin: bool,
        rst: bool,
    }

    fn segment(to_server: bool, seq: u32, flags: Flags, payload: &[u8], ts: u64) -> RawPacket {
        let mut builder = if to_server {
            PacketBuilder::ipv4(CLIENT, SERVER, 64).tcp(CPORT, 443, seq, 65535)
        } else {
            PacketBuilder::ipv4(SERVER, CLIENT, 64).tcp(443, CPORT, seq, 65535)
        };
        if flags.syn {
            builder = builder.syn();
        }
        if flags.ack {
            builder = builder.ack(1);
        }
        if flags.fin {
            builder = builder.fin();
        }
        if flags.rst {
            builder = builder.rst();
        }
        let mut data = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut data, payload).unwrap();
        RawPacket { timestamp: ts, data }
    }

    fn handshake(r: &mut TcpReassembler, out: &mut Vec<StreamEvent>) {
        r.process(&segment(true, 99, Flags { syn: true, ..Flags::default() }, &[], 1), out);
        r.process(
            &segment(false, 499, Flags { syn: true, ack: true, ..Flags::default() }, &[], 1),
            out,
        );
    }

    fn data(events: &[StreamEvent]) -> Vec<(Direction, Vec<u8>)> {
        events
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Data { direction, bytes, .. } => Some((*direction, bytes.to_vec())),
                _ => None,
            })
            .collect()
    }

    fn ack() -> Flags {
        Flags { ack: true, ..Flags::default() }
    }

    #[test]
    fn test_syn_opens_flow() {
        let mut r = reassembler();
        let mut out = Vec::new();
        handshake(&mut r, &mut out);
        assert_eq!(out, vec![StreamEvent::Opened { flow: flow(), timestamp: 1 }]);
        assert_eq!(r.active_flows(), 1);
    }

    #[test]
    fn test_in_order_delivery_both_directions() {
        let mut r = reassembler();
        let mut out = Vec::new();
        handshake(&mut r, &mut out);
        r.process(&segment(true, 100, ack(), b"hello", 2), &mut out);
        r.process(&segment(false, 500, ack(), b"world!", 2), &mut out);

        assert_eq!(
            data(&out),
            vec![
                (Direction::ClientToServer, b"hello".to_vec()),
                (Direction::ServerToClient, b"world!".to_vec()),
            ]
        );
    }

    #[test]
    fn test_unknown_flows_are_ignored() {
        let mut r = reassembler();
        let mut out = Vec::new();
        // Data without a preceding SYN
        r.process(&segment(true, 100, ack(), b"late", 1), &mut out);
        assert!(out.is_empty());
        assert_eq!(r.stats().ignored, 1);
    }

    #[test]
    fn test_other_servers_are_ignored() {
        let mut r = TcpReassembler::new(
            ServerAllowList::new([Ipv4Addr::new(10, 9, 9, 9)], 443).unwrap(),
            LinkType::RawIp,
            &CaptureConfig::default(),
        );
        let mut out = Vec::new();
        handshake(&mut r, &mut out);
        assert!(out.is_empty());
        assert_eq!(r.active_flows(), 0);
    }

    #[test]
    fn test_out_of_order_segments_are_reordered() {
        let mut r = reassembler();
        let mut out = Vec::new();
        handshake(&mut r, &mut out);
        r.process(&segment(false, 504, ack(), b"EFG", 2), &mut out);
        assert!(data(&out).is_empty());
        r.process(&segment(false, 500, ack(), b"ABCD", 2), &mut out);

        assert_eq!(data(&out), vec![(Direction::ServerToClient, b"ABCDEFG".to_vec())]);
        assert_eq!(r.stats().out_of_order, 1);
    }

    #[test]
    fn test_fin_on_held_segment_waits_for_gap() {
        let mut r = reassembler();
        let mut out = Vec::new();
        handshake(&mut r, &mut out);
        let fin = || Flags { fin: true, ack: true, ..Flags::default() };

        r.process(&segment(false, 504, fin(), b"EFG", 2), &mut out);
        r.process(&segment(true, 100, fin(), &[], 2), &mut out);
        assert_eq!(r.active_flows(), 1, "server bytes before its FIN are missing");

        r.process(&segment(false, 500, ack(), b"ABCD", 3), &mut out);
        assert_eq!(data(&out), vec![(Direction::ServerToClient, b"ABCDEFG".to_vec())]);
        assert_eq!(
            out.last(),
            Some(&StreamEvent::Closed {
                flow: flow(),
                reason: CloseReason::Fin,
                timestamp: 3
            })
        );
    }

    #[test]
    fn test_retransmission_is_trimmed() {
        let mut r = reassembler();
        let mut out = Vec::new();
        handshake(&mut r, &mut out);
        r.process(&segment(false, 500, ack(), b"ABCD", 2), &mut out);
        r.process(&segment(false, 500, ack(), b"ABCD", 2), &mut out);
        r.process(&segment(false, 502, ack(), b"CDEF", 2), &mut out);

        let delivered: Vec<u8> = data(&out).into_iter().flat_map(|(_, b)| b).collect();
        assert_eq!(delivered, b"ABCDEF");
        assert_eq!(r.stats().retransmitted_bytes, 6);
    }

    #[test]
    fn test_overflow_closes_flow() {
        let config = CaptureConfig {
            max_out_of_order: 2,
            ..CaptureConfig::default()
        };
        let mut r = TcpReassembler::new(allow(), LinkType::RawIp, &config);
        let mut out = Vec::new();
        handshake(&mut r, &mut out);
        for i in 0..3 {
            r.process(&segment(false, 600 + i * 10, ack(), b"x", 2), &mut out);
        }
        assert!(matches!(
            out.last(),
            Some(StreamEvent::Closed { reason: CloseReason::Overflow, .. })
        ));
        assert_eq!(r.active_flows(), 0);
    }

    #[test]
    fn test_fin_from_both_sides_closes() {
        let mut r = reassembler();
        let mut out = Vec::new();
        handshake(&mut r, &mut out);
        let fin = || Flags { fin: true, ack: true, ..Flags::default() };
        r.process(&segment(true, 100, fin(), &[], 3), &mut out);
        assert_eq!(r.active_flows(), 1);
        r.process(&segment(false, 500, fin(), &[], 3), &mut out);
        assert_eq!(
            out.last(),
            Some(&StreamEvent::Closed {
                flow: flow(),
                reason: CloseReason::Fin,
                timestamp: 3
            })
        );
    }

    #[test]
    fn test_reset_closes() {
        let mut r = reassembler();
        let mut out = Vec::new();
        handshake(&mut r, &mut out);
        r.process(&segment(false, 500, Flags { rst: true, ..Flags::default() }, &[], 4), &mut out);
        assert!(matches!(
            out.last(),
            Some(StreamEvent::Closed { reason: CloseReason::Reset, .. })
        ));
    }

    #[test]
    fn test_idle_flows_time_out() {
        let config = CaptureConfig::default().with_idle_timeout(Duration::from_secs(10));
        let mut r = TcpReassembler::new(allow(), LinkType::RawIp, &config);
        let mut out = Vec::new();
        handshake(&mut r, &mut out);
        r.sweep(5, &mut out);
        assert_eq!(r.active_flows(), 1);
        r.sweep(11, &mut out);
        assert_eq!(r.active_flows(), 0);
        assert!(matches!(
            out.last(),
            Some(StreamEvent::Closed { reason: CloseReason::Timeout, timestamp: 11, .. })
        ));
    }

    #[test]
    fn test_flow_table_cap() {
        let config = CaptureConfig {
            max_flows: 1,
            ..CaptureConfig::default()
        };
        let mut r = TcpReassembler::new(allow(), LinkType::RawIp, &config);
        let mut out = Vec::new();
        handshake(&mut r, &mut out);

        let mut other = segment(true, 7, Flags { syn: true, ..Flags::default() }, &[], 1);
        // Rewrite the client port of the second connection
        other.data[20..22].copy_from_slice(&52000u16.to_be_bytes());
        r.process(&other, &mut out);
        assert_eq!(r.active_flows(), 1);
        assert_eq!(r.stats().flows_rejected, 1);
    }

    #[test]
    fn test_finish_closes_everything() {
        let mut r = reassembler();
        let mut out = Vec::new();
        handshake(&mut r, &mut out);
        r.finish(9, &mut out);
        assert!(matches!(
            out.last(),
            Some(StreamEvent::Closed { reason: CloseReason::EndOfInput, .. })
        ));
    }

    #[test]
    fn test_sequence_wraparound() {
        let mut r = reassembler();
        let mut out = Vec::new();
        r.process(&segment(true, u32::MAX - 1, Flags { syn: true, ..Flags::default() }, &[], 1), &mut out);
        r.process(&segment(true, u32::MAX, ack(), b"ab", 1), &mut out);
        r.process(&segment(true, 1, ack(), b"cd", 1), &mut out);
        let delivered: Vec<u8> = data(&out).into_iter().flat_map(|(_, b)| b).collect();
        assert_eq!(delivered, b"abcd");
    }
}
