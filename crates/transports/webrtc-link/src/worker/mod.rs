//! Per-link connection worker: state machine, candidate gate, data channel
//! context, statistics and telemetry

pub mod candidates;
pub mod connection_worker;
pub mod context;
pub mod state;
pub mod stats;
pub mod telemetry;

pub use candidates::{Admission, CandidateGate};
pub use connection_worker::{
    ConnectionWorker, LinkEvent, WorkerCommand, WorkerHandle, WorkerShared,
};
pub use context::{ChannelRole, PeerConnectionContext, CONTROL_CHANNEL_LABEL, CUSTOM_CHANNEL_LABEL};
pub use state::{AtomicWorkerState, WorkerState};
pub use stats::{LinkStats, TransferRateCalculator};
pub use telemetry::{compare_versions, SystemInfo, Telemetry, VersionInfo, VideoMetrics, VideoRates};
