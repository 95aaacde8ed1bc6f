use std::net::IpAddr;

use crate::capture::{PacketInfo, TcpFlag, TcpFlags};
use crate::config::FlowConfig;
use crate::error::{FlowError, Result};

use super::active_idle::ActiveIdleTracker;
use super::bulk::BulkTransferDetector;
use super::features::{format_timestamp, FlowFeatures, LABEL_PLACEHOLDER};
use super::stats::IncrementalStatistics;
use super::subflow::SubflowDetector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDirection { Forward, Backward }

/// Lifecycle of one flow instance in the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStatus {
    Active,
    /// Closed by a packet carrying FIN.
    FinClosed,
    /// Closed because a packet arrived after the flow timeout.
    TimedOut,
    /// Flushed at end of capture or by an idle sweep.
    Drained,
}

/// Per-flag packet counters, indexed by `TcpFlag`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlagCounts([u64; 8]);

impl FlagCounts {
    pub fn record(&mut self, flags: TcpFlags) {
        for flag in flags.iter() {
            self.0[flag.index()] += 1;
        }
    }

    #[inline]
    pub fn get(&self, flag: TcpFlag) -> u64 {
        self.0[flag.index()]
    }
}

/// Counters kept separately for each direction.
#[derive(Debug, Clone)]
pub struct DirectionStats {
    pub payload: IncrementalStatistics,
    pub iat: IncrementalStatistics,
    pub bytes: u64,
    pub header_bytes: u64,
    pub psh_flags: u64,
    pub urg_flags: u64,
    pub init_window_bytes: i32,
    pub last_seen: u64,
}

impl Default for DirectionStats {
    fn default() -> Self {
        Self {
            payload: IncrementalStatistics::new(),
            iat: IncrementalStatistics::new(),
            bytes: 0,
            header_bytes: 0,
            psh_flags: 0,
            urg_flags: 0,
            init_window_bytes: -1,
            last_seen: 0,
        }
    }
}

impl DirectionStats {
    #[inline]
    pub fn packets(&self) -> u64 {
        self.payload.count()
    }
}

#[derive(Debug, Clone)]
pub struct FlowRecord {
    // Identity
    pub flow_id: String,
    pub instance: u64,
    pub src: IpAddr,
    pub dst: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
    pub bidirectional: bool,

    pub status: FlowStatus,

    pub fwd: DirectionStats,
    pub bwd: DirectionStats,
    packet_len: IncrementalStatistics,
    flow_iat: IncrementalStatistics,
    flags: FlagCounts,

    pub fwd_act_data_packets: u64,
    fwd_seg_size_min: Option<u64>,

    pub flow_start_time: u64,
    pub flow_last_seen: u64,

    fwd_bulk: BulkTransferDetector,
    bwd_bulk: BulkTransferDetector,
    subflows: SubflowDetector,
    active_idle: ActiveIdleTracker,
    activity_timeout: u64,

    packet_ids: Option<Vec<u64>>,
    finalized: bool,
}

impl FlowRecord {
    /// Start a flow whose identity comes from its first packet.
    pub fn new(instance: u64, packet: &PacketInfo, config: &FlowConfig) -> Self {
        let mut s = Self::blank(
            packet.forward_key(),
            instance,
            (packet.src, packet.src_port),
            (packet.dst, packet.dst_port),
            packet,
            config.bidirectional,
            config.activity_timeout_us(),
            config.save_packet_info,
        );
        s.first_packet(packet);
        s
    }

    /// Start the next instance of a timed-out flow. Endpoint identity, flow id
    /// and settings are inherited; statistics start from `packet`.
    pub fn continuation(instance: u64, packet: &PacketInfo, previous: &FlowRecord) -> Self {
        let mut s = Self::blank(
            previous.flow_id.clone(),
            instance,
            (previous.src, previous.src_port),
            (previous.dst, previous.dst_port),
            packet,
            previous.bidirectional,
            previous.activity_timeout,
            previous.packet_ids.is_some(),
        );
        s.first_packet(packet);
        s
    }

    #[allow(clippy::too_many_arguments)]
    fn blank(
        flow_id: String,
        instance: u64,
        (src, src_port): (IpAddr, u16),
        (dst, dst_port): (IpAddr, u16),
        packet: &PacketInfo,
        bidirectional: bool,
        activity_timeout: u64,
        keep_packet_ids: bool,
    ) -> Self {
        Self {
            flow_id,
            instance,
            src,
            dst,
            src_port,
            dst_port,
            protocol: packet.protocol,
            bidirectional,
            status: FlowStatus::Active,
            fwd: DirectionStats::default(),
            bwd: DirectionStats::default(),
            packet_len: IncrementalStatistics::new(),
            flow_iat: IncrementalStatistics::new(),
            flags: FlagCounts::default(),
            fwd_act_data_packets: 0,
            fwd_seg_size_min: None,
            flow_start_time: packet.timestamp,
            flow_last_seen: packet.timestamp,
            fwd_bulk: BulkTransferDetector::new(),
            bwd_bulk: BulkTransferDetector::new(),
            subflows: SubflowDetector::new(),
            active_idle: ActiveIdleTracker::new(packet.timestamp),
            activity_timeout,
            packet_ids: keep_packet_ids.then(Vec::new),
            finalized: false,
        }
    }

    /// Direction on the wire, by source address.
    #[inline]
    fn wire_direction(&self, packet: &PacketInfo) -> FlowDirection {
        if packet.src == self.src { FlowDirection::Forward } else { FlowDirection::Backward }
    }

    /// Direction the packet is accounted under; unidirectional flows fold everything forward.
    #[inline]
    pub fn direction_of(&self, packet: &PacketInfo) -> FlowDirection {
        if self.bidirectional { self.wire_direction(packet) } else { FlowDirection::Forward }
    }

    fn observe_common(&mut self, packet: &PacketInfo, bulk_direction: FlowDirection) {
        // Bulk detection
        match bulk_direction {
            FlowDirection::Forward => {
                let peer = self.bwd_bulk.last_bulk_time();
                self.fwd_bulk.observe(packet, peer);
            }
            FlowDirection::Backward => {
                let peer = self.fwd_bulk.last_bulk_time();
                self.bwd_bulk.observe(packet, peer);
            }
        }

        // Subflows; a new one also closes the current active period
        if self.subflows.observe(packet) {
            self.active_idle.rollover(packet.timestamp, self.activity_timeout);
        }

        self.flags.record(packet.flags);

        if let Some(ids) = self.packet_ids.as_mut() {
            ids.push(packet.id);
        }
    }

    /// Seed packet. Its bulk bytes always go to the backward detector, so a
    /// forward bulk run can only start with the second packet. PSH/URG are
    /// only tallied per direction here.
    fn first_packet(&mut self, packet: &PacketInfo) {
        self.observe_common(packet, FlowDirection::Backward);
        self.packet_len.add_value(packet.payload_bytes as f64);

        let direction = self.direction_of(packet);
        self.update_direction(packet, direction);

        let stats = match direction {
            FlowDirection::Forward => {
                self.fwd_seg_size_min = Some(packet.header_bytes as u64);
                &mut self.fwd
            }
            FlowDirection::Backward => &mut self.bwd,
        };
        if packet.has_flag(TcpFlag::Psh) { stats.psh_flags += 1; }
        if packet.has_flag(TcpFlag::Urg) { stats.urg_flags += 1; }
    }

    /// Account one more packet of this flow.
    pub fn add_packet(&mut self, packet: &PacketInfo) {
        self.observe_common(packet, self.wire_direction(packet));
        self.packet_len.add_value(packet.payload_bytes as f64);

        let direction = self.direction_of(packet);
        if direction == FlowDirection::Forward {
            if packet.payload_bytes >= 1 {
                self.fwd_act_data_packets += 1;
            }
            let header = packet.header_bytes as u64;
            self.fwd_seg_size_min = Some(self.fwd_seg_size_min.map_or(header, |m| m.min(header)));
        }
        self.update_direction(packet, direction);

        self.flow_iat.add_value(packet.timestamp.saturating_sub(self.flow_last_seen) as f64);
        self.flow_last_seen = packet.timestamp;
    }

    fn update_direction(&mut self, packet: &PacketInfo, direction: FlowDirection) {
        let stats = match direction {
            FlowDirection::Forward => &mut self.fwd,
            FlowDirection::Backward => &mut self.bwd,
        };

        if stats.init_window_bytes == -1 {
            stats.init_window_bytes = packet.tcp_window;
        }
        stats.payload.add_value(packet.payload_bytes as f64);
        stats.bytes += packet.payload_bytes as u64;
        stats.header_bytes += packet.header_bytes as u64;

        if stats.packets() > 1 {
            stats.iat.add_value(packet.timestamp.saturating_sub(stats.last_seen) as f64);
        }
        stats.last_seen = packet.timestamp;
    }

    /// Roll the active/idle tracker forward to `current_time`.
    #[inline]
    pub fn update_active_idle(&mut self, current_time: u64, activity_timeout: u64) {
        self.active_idle.rollover(current_time, activity_timeout);
    }

    /// Close this instance. The active/idle tail is flushed exactly once.
    pub fn finalize(&mut self, status: FlowStatus, flow_timeout: u64) {
        self.status = status;
        if self.finalized {
            return;
        }
        self.finalized = true;
        let ended_by_flag = status == FlowStatus::FinClosed;
        self.active_idle.finalize(self.flow_start_time, flow_timeout, ended_by_flag);
    }

    #[inline]
    pub fn is_finalized(&self) -> bool { self.finalized }

    pub fn packet_count(&self) -> u64 {
        if self.bidirectional {
            self.fwd.packets() + self.bwd.packets()
        } else {
            self.fwd.packets()
        }
    }

    /// Packet ids of this instance, when packet-info retention is on.
    pub fn packet_ids(&self) -> Option<&[u64]> {
        self.packet_ids.as_deref()
    }

    #[inline]
    pub fn flow_duration(&self) -> u64 {
        self.flow_last_seen.saturating_sub(self.flow_start_time)
    }

    /// `count` per second of flow duration, 0 for zero-length flows.
    fn per_second(&self, count: f64) -> f64 {
        let duration = self.flow_duration();
        if duration == 0 {
            return 0.0;
        }
        count / (duration as f64 / 1_000_000.0)
    }

    pub fn flow_bytes_per_sec(&self) -> f64 {
        self.per_second((self.fwd.bytes + self.bwd.bytes) as f64)
    }

    pub fn flow_packets_per_sec(&self) -> f64 {
        self.per_second(self.packet_count() as f64)
    }

    pub fn fwd_packets_per_sec(&self) -> f64 {
        self.per_second(self.fwd.packets() as f64)
    }

    pub fn bwd_packets_per_sec(&self) -> f64 {
        self.per_second(self.bwd.packets() as f64)
    }

    pub fn down_up_ratio(&self) -> f64 {
        let fwd = self.fwd.packets();
        if fwd == 0 { 0.0 } else { self.bwd.packets() as f64 / fwd as f64 }
    }

    pub fn avg_packet_size(&self) -> f64 {
        let n = self.packet_count();
        if n == 0 { 0.0 } else { self.packet_len.sum() / n as f64 }
    }

    pub fn fwd_segment_size_avg(&self) -> f64 {
        let n = self.fwd.packets();
        if n == 0 { 0.0 } else { self.fwd.payload.sum() / n as f64 }
    }

    pub fn bwd_segment_size_avg(&self) -> f64 {
        let n = self.bwd.packets();
        if n == 0 { 0.0 } else { self.bwd.payload.sum() / n as f64 }
    }

    pub fn fwd_seg_size_min(&self) -> u64 {
        self.fwd_seg_size_min.unwrap_or(0)
    }

    #[inline]
    pub fn flag_count(&self, flag: TcpFlag) -> u64 { self.flags.get(flag) }

    #[inline]
    pub fn flow_iat(&self) -> &IncrementalStatistics { &self.flow_iat }

    #[inline]
    pub fn packet_length(&self) -> &IncrementalStatistics { &self.packet_len }

    #[inline]
    pub fn subflow_count(&self) -> u64 { self.subflows.count() }

    #[inline]
    pub fn fwd_bulk(&self) -> &BulkTransferDetector { &self.fwd_bulk }

    #[inline]
    pub fn bwd_bulk(&self) -> &BulkTransferDetector { &self.bwd_bulk }

    #[inline]
    pub fn active_idle(&self) -> &ActiveIdleTracker { &self.active_idle }

    /// Snapshot of every exported feature.
    pub fn features(&self) -> FlowFeatures {
        let fwd = &self.fwd;
        let bwd = &self.bwd;
        let active = self.active_idle.active();
        let idle = self.active_idle.idle();

        FlowFeatures {
            flow_id: self.flow_id.clone(),
            src_ip: self.src.to_string(),
            src_port: self.src_port,
            dst_ip: self.dst.to_string(),
            dst_port: self.dst_port,
            protocol: self.protocol,
            timestamp: format_timestamp(self.flow_start_time),

            flow_duration: self.flow_duration(),
            tot_fwd_pkts: fwd.packets(),
            tot_bwd_pkts: bwd.packets(),
            totlen_fwd_pkts: fwd.payload.sum(),
            totlen_bwd_pkts: bwd.payload.sum(),

            fwd_pkt_len_max: fwd.payload.max(),
            fwd_pkt_len_min: fwd.payload.min(),
            fwd_pkt_len_mean: fwd.payload.mean(),
            fwd_pkt_len_std: fwd.payload.std_dev(),
            bwd_pkt_len_max: bwd.payload.max(),
            bwd_pkt_len_min: bwd.payload.min(),
            bwd_pkt_len_mean: bwd.payload.mean(),
            bwd_pkt_len_std: bwd.payload.std_dev(),

            flow_bytes_per_sec: self.flow_bytes_per_sec(),
            flow_packets_per_sec: self.flow_packets_per_sec(),

            flow_iat_mean: self.flow_iat.mean(),
            flow_iat_std: self.flow_iat.std_dev(),
            flow_iat_max: self.flow_iat.max(),
            flow_iat_min: self.flow_iat.min(),

            fwd_iat_total: fwd.iat.sum(),
            fwd_iat_mean: fwd.iat.mean(),
            fwd_iat_std: fwd.iat.std_dev(),
            fwd_iat_max: fwd.iat.max(),
            fwd_iat_min: fwd.iat.min(),

            bwd_iat_total: bwd.iat.sum(),
            bwd_iat_mean: bwd.iat.mean(),
            bwd_iat_std: bwd.iat.std_dev(),
            bwd_iat_max: bwd.iat.max(),
            bwd_iat_min: bwd.iat.min(),

            fwd_psh_flags: fwd.psh_flags,
            bwd_psh_flags: bwd.psh_flags,
            fwd_urg_flags: fwd.urg_flags,
            bwd_urg_flags: bwd.urg_flags,
            fwd_header_len: fwd.header_bytes,
            bwd_header_len: bwd.header_bytes,
            fwd_packets_per_sec: self.fwd_packets_per_sec(),
            bwd_packets_per_sec: self.bwd_packets_per_sec(),

            pkt_len_min: self.packet_len.min(),
            pkt_len_max: self.packet_len.max(),
            pkt_len_mean: self.packet_len.mean(),
            pkt_len_std: self.packet_len.std_dev(),
            pkt_len_var: self.packet_len.variance(),

            fin_flag_count: self.flags.get(TcpFlag::Fin),
            syn_flag_count: self.flags.get(TcpFlag::Syn),
            rst_flag_count: self.flags.get(TcpFlag::Rst),
            psh_flag_count: self.flags.get(TcpFlag::Psh),
            ack_flag_count: self.flags.get(TcpFlag::Ack),
            urg_flag_count: self.flags.get(TcpFlag::Urg),
            cwr_flag_count: self.flags.get(TcpFlag::Cwr),
            ece_flag_count: self.flags.get(TcpFlag::Ece),

            down_up_ratio: self.down_up_ratio(),
            avg_packet_size: self.avg_packet_size(),
            fwd_segment_size_avg: self.fwd_segment_size_avg(),
            bwd_segment_size_avg: self.bwd_segment_size_avg(),

            fwd_bytes_bulk_avg: self.fwd_bulk.avg_bytes_per_bulk(),
            fwd_packet_bulk_avg: self.fwd_bulk.avg_packets_per_bulk(),
            fwd_bulk_rate_avg: self.fwd_bulk.avg_bulk_rate(),
            bwd_bytes_bulk_avg: self.bwd_bulk.avg_bytes_per_bulk(),
            bwd_packet_bulk_avg: self.bwd_bulk.avg_packets_per_bulk(),
            bwd_bulk_rate_avg: self.bwd_bulk.avg_bulk_rate(),

            subflow_fwd_packets: self.subflows.per_subflow(fwd.packets()),
            subflow_fwd_bytes: self.subflows.per_subflow(fwd.bytes),
            subflow_bwd_packets: self.subflows.per_subflow(bwd.packets()),
            subflow_bwd_bytes: self.subflows.per_subflow(bwd.bytes),

            fwd_init_win_bytes: fwd.init_window_bytes,
            bwd_init_win_bytes: bwd.init_window_bytes,
            fwd_act_data_pkts: self.fwd_act_data_packets,
            fwd_seg_size_min: self.fwd_seg_size_min(),

            active_mean: active.mean(),
            active_std: active.std_dev(),
            active_max: active.max(),
            active_min: active.min(),

            idle_mean: idle.mean(),
            idle_std: idle.std_dev(),
            idle_max: idle.max(),
            idle_min: idle.min(),

            label: LABEL_PLACEHOLDER.to_string(),
        }
    }

    /// Feature row as one CSV line, without the trailing newline.
    pub fn dump_csv_line(&self) -> Result<String> {
        let mut wtr = csv::WriterBuilder::new().has_headers(false).from_writer(Vec::new());
        wtr.serialize(self.features())?;
        let bytes = wtr.into_inner().map_err(|e| FlowError::Io(e.into_error()))?;
        Ok(String::from_utf8_lossy(&bytes).trim_end().to_string())
    }
}
