mod csv_writer;
mod packet_json;

pub use csv_writer::{dump_labeled_current_flows, dump_labeled_flows, FlowCsvWriter};
pub use packet_json::PacketIdExporter;
