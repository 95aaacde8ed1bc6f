use chrono::{DateTime, Local};
use serde::Serialize;

/// Value written in the `Label` column until a flow is annotated by hand.
pub const LABEL_PLACEHOLDER: &str = "NeedManualLabel";

/// Timestamp column layout, e.g. `07/03/2024 02:15:09 PM`.
const TIMESTAMP_FORMAT: &str = "%d/%m/%Y %I:%M:%S %p";

/// CSV header, one entry per `FlowFeatures` field in declaration order.
pub const COLUMNS: [&str; 84] = [
    "Flow ID", "Src IP", "Src Port", "Dst IP", "Dst Port", "Protocol", "Timestamp",
    "Flow Duration", "Total Fwd Packet", "Total Bwd packets",
    "Total Length of Fwd Packet", "Total Length of Bwd Packet",
    "Fwd Packet Length Max", "Fwd Packet Length Min", "Fwd Packet Length Mean", "Fwd Packet Length Std",
    "Bwd Packet Length Max", "Bwd Packet Length Min", "Bwd Packet Length Mean", "Bwd Packet Length Std",
    "Flow Bytes/s", "Flow Packets/s",
    "Flow IAT Mean", "Flow IAT Std", "Flow IAT Max", "Flow IAT Min",
    "Fwd IAT Total", "Fwd IAT Mean", "Fwd IAT Std", "Fwd IAT Max", "Fwd IAT Min",
    "Bwd IAT Total", "Bwd IAT Mean", "Bwd IAT Std", "Bwd IAT Max", "Bwd IAT Min",
    "Fwd PSH Flags", "Bwd PSH Flags", "Fwd URG Flags", "Bwd URG Flags",
    "Fwd Header Length", "Bwd Header Length", "Fwd Packets/s", "Bwd Packets/s",
    "Packet Length Min", "Packet Length Max", "Packet Length Mean", "Packet Length Std", "Packet Length Variance",
    "FIN Flag Count", "SYN Flag Count", "RST Flag Count", "PSH Flag Count",
    "ACK Flag Count", "URG Flag Count", "CWR Flag Count", "ECE Flag Count",
    "Down/Up Ratio", "Average Packet Size", "Fwd Segment Size Avg", "Bwd Segment Size Avg",
    "Fwd Bytes/Bulk Avg", "Fwd Packet/Bulk Avg", "Fwd Bulk Rate Avg",
    "Bwd Bytes/Bulk Avg", "Bwd Packet/Bulk Avg", "Bwd Bulk Rate Avg",
    "Subflow Fwd Packets", "Subflow Fwd Bytes", "Subflow Bwd Packets", "Subflow Bwd Bytes",
    "FWD Init Win Bytes", "Bwd Init Win Bytes", "Fwd Act Data Pkts", "Fwd Seg Size Min",
    "Active Mean", "Active Std", "Active Max", "Active Min",
    "Idle Mean", "Idle Std", "Idle Max", "Idle Min",
    "Label",
];

/// One exported row per finished flow. Field order is the column order.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct FlowFeatures {
    #[serde(rename = "Flow ID")]
    pub flow_id: String,
    #[serde(rename = "Src IP")]
    pub src_ip: String,
    #[serde(rename = "Src Port")]
    pub src_port: u16,
    #[serde(rename = "Dst IP")]
    pub dst_ip: String,
    #[serde(rename = "Dst Port")]
    pub dst_port: u16,
    #[serde(rename = "Protocol")]
    pub protocol: u8,
    #[serde(rename = "Timestamp")]
    pub timestamp: String,

    #[serde(rename = "Flow Duration")]
    pub flow_duration: u64,
    #[serde(rename = "Total Fwd Packet")]
    pub tot_fwd_pkts: u64,
    #[serde(rename = "Total Bwd packets")]
    pub tot_bwd_pkts: u64,
    #[serde(rename = "Total Length of Fwd Packet")]
    pub totlen_fwd_pkts: f64,
    #[serde(rename = "Total Length of Bwd Packet")]
    pub totlen_bwd_pkts: f64,

    #[serde(rename = "Fwd Packet Length Max")]
    pub fwd_pkt_len_max: f64,
    #[serde(rename = "Fwd Packet Length Min")]
    pub fwd_pkt_len_min: f64,
    #[serde(rename = "Fwd Packet Length Mean")]
    pub fwd_pkt_len_mean: f64,
    #[serde(rename = "Fwd Packet Length Std")]
    pub fwd_pkt_len_std: f64,
    #[serde(rename = "Bwd Packet Length Max")]
    pub bwd_pkt_len_max: f64,
    #[serde(rename = "Bwd Packet Length Min")]
    pub bwd_pkt_len_min: f64,
    #[serde(rename = "Bwd Packet Length Mean")]
    pub bwd_pkt_len_mean: f64,
    #[serde(rename = "Bwd Packet Length Std")]
    pub bwd_pkt_len_std: f64,

    #[serde(rename = "Flow Bytes/s")]
    pub flow_bytes_per_sec: f64,
    #[serde(rename = "Flow Packets/s")]
    pub flow_packets_per_sec: f64,

    #[serde(rename = "Flow IAT Mean")]
    pub flow_iat_mean: f64,
    #[serde(rename = "Flow IAT Std")]
    pub flow_iat_std: f64,
    #[serde(rename = "Flow IAT Max")]
    pub flow_iat_max: f64,
    #[serde(rename = "Flow IAT Min")]
    pub flow_iat_min: f64,

    #[serde(rename = "Fwd IAT Total")]
    pub fwd_iat_total: f64,
    #[serde(rename = "Fwd IAT Mean")]
    pub fwd_iat_mean: f64,
    #[serde(rename = "Fwd IAT Std")]
    pub fwd_iat_std: f64,
    #[serde(rename = "Fwd IAT Max")]
    pub fwd_iat_max: f64,
    #[serde(rename = "Fwd IAT Min")]
    pub fwd_iat_min: f64,

    #[serde(rename = "Bwd IAT Total")]
    pub bwd_iat_total: f64,
    #[serde(rename = "Bwd IAT Mean")]
    pub bwd_iat_mean: f64,
    #[serde(rename = "Bwd IAT Std")]
    pub bwd_iat_std: f64,
    #[serde(rename = "Bwd IAT Max")]
    pub bwd_iat_max: f64,
    #[serde(rename = "Bwd IAT Min")]
    pub bwd_iat_min: f64,

    #[serde(rename = "Fwd PSH Flags")]
    pub fwd_psh_flags: u64,
    #[serde(rename = "Bwd PSH Flags")]
    pub bwd_psh_flags: u64,
    #[serde(rename = "Fwd URG Flags")]
    pub fwd_urg_flags: u64,
    #[serde(rename = "Bwd URG Flags")]
    pub bwd_urg_flags: u64,
    #[serde(rename = "Fwd Header Length")]
    pub fwd_header_len: u64,
    #[serde(rename = "Bwd Header Length")]
    pub bwd_header_len: u64,
    #[serde(rename = "Fwd Packets/s")]
    pub fwd_packets_per_sec: f64,
    #[serde(rename = "Bwd Packets/s")]
    pub bwd_packets_per_sec: f64,

    #[serde(rename = "Packet Length Min")]
    pub pkt_len_min: f64,
    #[serde(rename = "Packet Length Max")]
    pub pkt_len_max: f64,
    #[serde(rename = "Packet Length Mean")]
    pub pkt_len_mean: f64,
    #[serde(rename = "Packet Length Std")]
    pub pkt_len_std: f64,
    #[serde(rename = "Packet Length Variance")]
    pub pkt_len_var: f64,

    #[serde(rename = "FIN Flag Count")]
    pub fin_flag_count: u64,
    #[serde(rename = "SYN Flag Count")]
    pub syn_flag_count: u64,
    #[serde(rename = "RST Flag Count")]
    pub rst_flag_count: u64,
    #[serde(rename = "PSH Flag Count")]
    pub psh_flag_count: u64,
    #[serde(rename = "ACK Flag Count")]
    pub ack_flag_count: u64,
    #[serde(rename = "URG Flag Count")]
    pub urg_flag_count: u64,
    #[serde(rename = "CWR Flag Count")]
    pub cwr_flag_count: u64,
    #[serde(rename = "ECE Flag Count")]
    pub ece_flag_count: u64,

    #[serde(rename = "Down/Up Ratio")]
    pub down_up_ratio: f64,
    #[serde(rename = "Average Packet Size")]
    pub avg_packet_size: f64,
    #[serde(rename = "Fwd Segment Size Avg")]
    pub fwd_segment_size_avg: f64,
    #[serde(rename = "Bwd Segment Size Avg")]
    pub bwd_segment_size_avg: f64,

    #[serde(rename = "Fwd Bytes/Bulk Avg")]
    pub fwd_bytes_bulk_avg: u64,
    #[serde(rename = "Fwd Packet/Bulk Avg")]
    pub fwd_packet_bulk_avg: u64,
    #[serde(rename = "Fwd Bulk Rate Avg")]
    pub fwd_bulk_rate_avg: u64,
    #[serde(rename = "Bwd Bytes/Bulk Avg")]
    pub bwd_bytes_bulk_avg: u64,
    #[serde(rename = "Bwd Packet/Bulk Avg")]
    pub bwd_packet_bulk_avg: u64,
    #[serde(rename = "Bwd Bulk Rate Avg")]
    pub bwd_bulk_rate_avg: u64,

    #[serde(rename = "Subflow Fwd Packets")]
    pub subflow_fwd_packets: u64,
    #[serde(rename = "Subflow Fwd Bytes")]
    pub subflow_fwd_bytes: u64,
    #[serde(rename = "Subflow Bwd Packets")]
    pub subflow_bwd_packets: u64,
    #[serde(rename = "Subflow Bwd Bytes")]
    pub subflow_bwd_bytes: u64,

    #[serde(rename = "FWD Init Win Bytes")]
    pub fwd_init_win_bytes: i32,
    #[serde(rename = "Bwd Init Win Bytes")]
    pub bwd_init_win_bytes: i32,
    #[serde(rename = "Fwd Act Data Pkts")]
    pub fwd_act_data_pkts: u64,
    #[serde(rename = "Fwd Seg Size Min")]
    pub fwd_seg_size_min: u64,

    #[serde(rename = "Active Mean")]
    pub active_mean: f64,
    #[serde(rename = "Active Std")]
    pub active_std: f64,
    #[serde(rename = "Active Max")]
    pub active_max: f64,
    #[serde(rename = "Active Min")]
    pub active_min: f64,

    #[serde(rename = "Idle Mean")]
    pub idle_mean: f64,
    #[serde(rename = "Idle Std")]
    pub idle_std: f64,
    #[serde(rename = "Idle Max")]
    pub idle_max: f64,
    #[serde(rename = "Idle Min")]
    pub idle_min: f64,

    #[serde(rename = "Label")]
    pub label: String,
}

impl FlowFeatures {
    /// Comma-joined header line, without a trailing newline.
    pub fn header() -> String {
        COLUMNS.join(",")
    }
}

/// Render a microsecond epoch timestamp in local time for the `Timestamp` column.
pub fn format_timestamp(timestamp_us: u64) -> String {
    let Ok(micros) = i64::try_from(timestamp_us) else {
        return String::new();
    };
    DateTime::from_timestamp_micros(micros)
        .map(|utc| utc.with_timezone(&Local).format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialized_header_matches_columns() {
        let mut wtr = csv::Writer::from_writer(vec![]);
        wtr.serialize(FlowFeatures::default()).unwrap();
        let out = String::from_utf8(wtr.into_inner().unwrap()).unwrap();
        let mut lines = out.lines();

        assert_eq!(lines.next().unwrap(), FlowFeatures::header());
        let row = lines.next().unwrap();
        assert_eq!(row.split(',').count(), COLUMNS.len());
    }

    #[test]
    fn timestamp_uses_twelve_hour_clock() {
        let ts = format_timestamp(1_700_000_000_000_000);
        assert_eq!(ts.len(), "dd/mm/yyyy hh:mm:ss AM".len());
        assert!(ts.ends_with("AM") || ts.ends_with("PM"));
        assert_eq!(format_timestamp(u64::MAX), "");
    }
}
