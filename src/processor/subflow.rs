use crate::capture::PacketInfo;

/// Gap between consecutive packets of a flow that opens a new subflow.
pub const SUBFLOW_GAP_US: u64 = 1_000_000;

#[derive(Debug, Clone, Default)]
pub struct SubflowDetector {
    last_packet_time: Option<u64>,
    period_anchor: u64,
    count: u64,
    last_duration: u64,
}

impl SubflowDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when this packet starts a new subflow. The caller is
    /// expected to roll its active/idle tracker over at that point.
    pub fn observe(&mut self, packet: &PacketInfo) -> bool {
        let now = packet.timestamp;
        let Some(last) = self.last_packet_time.replace(now) else {
            self.period_anchor = now;
            return false;
        };

        if now.saturating_sub(last) > SUBFLOW_GAP_US {
            self.count += 1;
            self.last_duration = now.saturating_sub(self.period_anchor);
            self.period_anchor = now;
            return true;
        }
        false
    }

    #[inline]
    pub fn count(&self) -> u64 { self.count }

    /// Length of the subflow closed by the most recent gap.
    #[inline]
    pub fn last_subflow_duration(&self) -> u64 { self.last_duration }

    /// `total / count`, or 0 before the first gap.
    #[inline]
    pub fn per_subflow(&self, total: u64) -> u64 {
        if self.count == 0 { 0 } else { total / self.count }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PROTO_UDP;
    use std::net::{IpAddr, Ipv6Addr};

    fn pkt(ts: u64) -> PacketInfo {
        let a = IpAddr::V6(Ipv6Addr::LOCALHOST);
        PacketInfo::new(0, ts, a, 53, a, 5353, PROTO_UDP)
    }

    #[test]
    fn no_long_gap_means_no_subflow() {
        let mut sf = SubflowDetector::new();
        for ts in [0, 400_000, 900_000, 1_900_000, 2_900_000] {
            assert!(!sf.observe(&pkt(ts)));
        }
        assert_eq!(sf.count(), 0);
        assert_eq!(sf.per_subflow(1000), 0);
    }

    #[test]
    fn one_gap_counts_once() {
        let mut sf = SubflowDetector::new();
        assert!(!sf.observe(&pkt(0)));
        assert!(!sf.observe(&pkt(500_000)));
        assert!(sf.observe(&pkt(2_600_000)));
        assert!(!sf.observe(&pkt(2_700_000)));
        assert_eq!(sf.count(), 1);
        assert_eq!(sf.last_subflow_duration(), 2_600_000);
        assert_eq!(sf.per_subflow(7), 7);
    }

    #[test]
    fn exactly_one_second_is_not_a_gap() {
        let mut sf = SubflowDetector::new();
        sf.observe(&pkt(10));
        assert!(!sf.observe(&pkt(1_000_010)));
        assert!(sf.observe(&pkt(2_000_011)));
        assert_eq!(sf.count(), 1);
        assert_eq!(sf.last_subflow_duration(), 2_000_001);
    }
}
