pub mod error;
pub mod imaging;
pub mod seed;
pub mod frame_scorer;
pub mod result;
pub mod simulation;
pub mod recommendation;
pub mod video_processor;
pub mod processor;
pub mod store;
pub mod history;
pub mod auth;
pub mod monitor;
pub mod report;
pub mod config;
pub mod handler;

pub use error::{AnalysisError, StoreError};
pub use video_processor::{FrameSource, MemoryFrameSource, VideoProcessor};
pub use frame_scorer::{FrameSample, FrameScorer, SubScores};
pub use result::{FeatureAnalysis, ScoreEvent, SessionResult};
pub use simulation::SimulationConfig;
pub use recommendation::{generate_recommendation, FertilityBand};
pub use processor::{analyze_frames, analyze_video, analyze_video_lenient};
pub use history::{HistoryStats, HistoryStore, PredictionRecord};
pub use auth::UserStore;
pub use monitor::{MonitorSession, MonitorSettings};
pub use report::DetailedReport;
pub use config::{AppConfig, ConfigLoader, RawSimulation};
