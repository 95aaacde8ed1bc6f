use crossbeam_channel::{select, tick, Receiver};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::output::{FlowCsvWriter, PacketIdExporter};
use crate::types::TableStats;
use super::flow::FlowRecord;

const REPORT_INTERVAL: Duration = Duration::from_secs(5);

/// Write finished flows as they arrive. Runs until the flow channel
/// disconnects, so flows drained at shutdown are still written; clearing
/// `running` stops it early after whatever is already queued.
/// Returns the number of rows written.
pub fn publisher_loop(
    running: Arc<AtomicBool>,
    flow_rx: Receiver<FlowRecord>,
    stats_rx: Receiver<TableStats>,
    mut writer: FlowCsvWriter,
    mut exporter: PacketIdExporter,
) -> u64 {
    let report_tick = tick(REPORT_INTERVAL);
    let mut latest: Option<TableStats> = None;
    let mut written: u64 = 0;
    let mut disconnected = false;

    let mut publish = |flow: FlowRecord| {
        if flow.packet_count() <= 1 {
            return;
        }
        match writer.write_flow(&flow) {
            Ok(()) => written += 1,
            Err(e) => error!(flow_id = %flow.flow_id, error = %e, "failed to write flow"),
        }
        if let Err(e) = exporter.save(&flow) {
            error!(flow_id = %flow.flow_id, error = %e, "packet id export failed");
        }
    };

    loop {
        if disconnected { break; }
        if !running.load(Ordering::Relaxed) {
            flow_rx.try_iter().for_each(&mut publish);
            break;
        }

        select! {
            recv(flow_rx) -> msg => {
                match msg {
                    Ok(flow) => publish(flow),
                    Err(_) => disconnected = true,
                }
            }
            recv(stats_rx) -> msg => {
                if let Ok(s) = msg { latest = Some(s); }
            }
            recv(report_tick) -> _ => {
                if let Some(ref s) = latest {
                    info!(
                        active = s.active_flows,
                        finished = s.finished_flows,
                        packets = s.total_packets,
                        pps = s.packets_per_second,
                        "flow table"
                    );
                }
            }
        }
    }

    drop(publish);
    info!(rows = written, "publisher stopped");
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PacketInfo, PROTO_UDP};
    use crate::config::FlowConfig;
    use crossbeam_channel::unbounded;
    use std::net::{IpAddr, Ipv4Addr};

    #[test]
    fn writes_until_disconnect_and_skips_noise() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.csv");
        let writer = FlowCsvWriter::with_default_header(&path).unwrap();
        let exporter = PacketIdExporter::new(dir.path(), false);

        let (flow_tx, flow_rx) = unbounded();
        let (_stats_tx, stats_rx) = unbounded();

        let a = IpAddr::V4(Ipv4Addr::new(10, 9, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 9, 0, 2));
        let mut pair = FlowRecord::new(1, &PacketInfo::new(1, 0, a, 7, b, 8, PROTO_UDP), &FlowConfig::default());
        pair.add_packet(&PacketInfo::new(2, 1, b, 8, a, 7, PROTO_UDP));
        let lone = FlowRecord::new(2, &PacketInfo::new(3, 2, b, 9, a, 7, PROTO_UDP), &FlowConfig::default());

        flow_tx.send(pair).unwrap();
        flow_tx.send(lone).unwrap();
        drop(flow_tx);

        let rows = publisher_loop(Arc::new(AtomicBool::new(true)), flow_rx, stats_rx, writer, exporter);
        assert_eq!(rows, 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }
}
