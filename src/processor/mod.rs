pub mod feature_processor;
pub mod features;
mod active_idle;
mod bulk;
mod engine;
mod flow;
mod publisher;
mod stats;
mod subflow;

pub use active_idle::ActiveIdleTracker;
pub use bulk::{BulkTransferDetector, BULK_GAP_US, BULK_MIN_PACKETS};
pub use engine::{
    processing_loop, ChannelSink, FinishedFlowStore, FlowListener, FlowSink, FlowTable, ListenerSink,
};
pub use feature_processor::FeatureProcessor;
pub use features::{FlowFeatures, COLUMNS, LABEL_PLACEHOLDER};
pub use flow::{DirectionStats, FlagCounts, FlowDirection, FlowRecord, FlowStatus};
pub use publisher::publisher_loop;
pub use stats::IncrementalStatistics;
pub use subflow::{SubflowDetector, SUBFLOW_GAP_US};
