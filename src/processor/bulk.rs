use crate::capture::PacketInfo;

/// Payload packets needed before a run counts as a bulk.
pub const BULK_MIN_PACKETS: u64 = 4;
/// Largest gap between payload packets that keeps a run alive.
pub const BULK_GAP_US: u64 = 1_000_000;

/// Per-direction bulk-transfer state machine.
///
/// A run is a sequence of payload-bearing packets in one direction with
/// gaps of at most one second. The run is charged to the totals in one go
/// when its fourth packet arrives; later packets of the same run are
/// charged one by one.
#[derive(Debug, Clone, Default)]
pub struct BulkTransferDetector {
    // in-progress run
    run_start: Option<u64>,
    last_packet_time: Option<u64>,
    run_packets: u64,
    run_bytes: u64,

    // committed
    bulk_count: u64,
    bulk_packets: u64,
    bulk_bytes: u64,
    bulk_duration: u64,
}

impl BulkTransferDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one packet of this direction. `peer_last_bulk_time` is the last
    /// payload packet seen by the opposite direction's detector; if it is
    /// newer than the start of our run, the run is abandoned.
    pub fn observe(&mut self, packet: &PacketInfo, peer_last_bulk_time: Option<u64>) {
        if let (Some(peer), Some(start)) = (peer_last_bulk_time, self.run_start) {
            if peer > start {
                self.run_start = None;
            }
        }

        let size = packet.payload_bytes as u64;
        if size == 0 {
            return;
        }
        let now = packet.timestamp;

        let (Some(start), Some(last)) = (self.run_start, self.last_packet_time) else {
            self.start_run(now, size);
            return;
        };

        if now.saturating_sub(last) > BULK_GAP_US {
            self.start_run(now, size);
            return;
        }

        self.run_packets += 1;
        self.run_bytes += size;
        if self.run_packets == BULK_MIN_PACKETS {
            self.bulk_count += 1;
            self.bulk_packets += self.run_packets;
            self.bulk_bytes += self.run_bytes;
            self.bulk_duration += now.saturating_sub(start);
        } else if self.run_packets > BULK_MIN_PACKETS {
            self.bulk_packets += 1;
            self.bulk_bytes += size;
            self.bulk_duration += now.saturating_sub(last);
        }
        self.last_packet_time = Some(now);
    }

    fn start_run(&mut self, now: u64, size: u64) {
        self.run_start = Some(now);
        self.last_packet_time = Some(now);
        self.run_packets = 1;
        self.run_bytes = size;
    }

    /// Time of the last payload packet observed in this direction.
    #[inline]
    pub fn last_bulk_time(&self) -> Option<u64> { self.last_packet_time }

    #[inline]
    pub fn bulk_count(&self) -> u64 { self.bulk_count }

    #[inline]
    pub fn bulk_packet_total(&self) -> u64 { self.bulk_packets }

    #[inline]
    pub fn bulk_byte_total(&self) -> u64 { self.bulk_bytes }

    /// Committed bulk time in microseconds.
    #[inline]
    pub fn bulk_duration_total(&self) -> u64 { self.bulk_duration }

    pub fn avg_bytes_per_bulk(&self) -> u64 {
        if self.bulk_count == 0 { 0 } else { self.bulk_bytes / self.bulk_count }
    }

    pub fn avg_packets_per_bulk(&self) -> u64 {
        if self.bulk_count == 0 { 0 } else { self.bulk_packets / self.bulk_count }
    }

    /// Bytes per second over the committed bulk time, truncated.
    pub fn avg_bulk_rate(&self) -> u64 {
        if self.bulk_duration == 0 {
            return 0;
        }
        (self.bulk_bytes as f64 / (self.bulk_duration as f64 / 1_000_000.0)) as u64
    }
}
