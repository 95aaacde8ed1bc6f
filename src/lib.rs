pub mod capture;
pub mod config;
pub mod error;
pub mod output;
pub mod processor;
pub mod types;

use anyhow::{anyhow, Context};
use std::thread;
use tracing_subscriber::EnvFilter;

pub use capture::{PacketIdGenerator, PacketInfo, TcpFlag, TcpFlags};
pub use config::{FlowConfig, OutputConfig};
pub use error::{FlowError, Result};
pub use output::{FlowCsvWriter, PacketIdExporter};
pub use processor::{FeatureProcessor, FlowFeatures, FlowRecord, FlowTable};
pub use types::TableStats;

/// Install a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
/// Does nothing if a global subscriber is already set.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Run `packets` through a sharded processor and write every finished flow
/// to the configured CSV file (and packet-id JSON when enabled).
/// Returns the number of rows written.
pub fn extract_flows<I>(config: FlowConfig, output: &OutputConfig, workers: usize, packets: I) -> anyhow::Result<u64>
where
    I: IntoIterator<Item = PacketInfo>,
{
    let writer = FlowCsvWriter::with_default_header(output.csv_path()?)
        .context("failed to open flow CSV")?;
    let exporter = PacketIdExporter::new(output.packet_json_dir(), config.save_packet_info);

    let mut processor = FeatureProcessor::start(config, workers)?;

    let publisher = {
        let running = processor.running();
        let flow_rx = processor.flows();
        let stats_rx = processor.stats();
        thread::Builder::new()
            .name("flow-publisher".into())
            .spawn(move || processor::publisher_loop(running, flow_rx, stats_rx, writer, exporter))
            .context("failed to spawn publisher")?
    };

    for packet in packets {
        processor.submit(packet)?;
    }
    processor.stop()?;

    publisher.join().map_err(|_| anyhow!("publisher panicked"))
}
