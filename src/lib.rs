pub mod analysis;
pub mod config;
pub mod delay_manager;
pub mod discovery;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod harvest;
pub mod input_loader;
pub mod logger;
pub mod models;
pub mod prepare;
pub mod resume_manager;
pub mod scoring;

// Exporting types for convenience
pub use config::HarvestConfig;
pub use discovery::RecordDiscoverer;
pub use error::{HarvestError, Result};
pub use extractor::Extractor;
pub use fetcher::{HttpFetcher, ListingViewport, PageFetcher, ScrollExtent};
pub use harvest::{Harvester, HarvestReport, JsonDirSink, MemorySink, RecordSink};
pub use models::{ListingRow, Program, ProgramHarvest, ProjectRecord, ProjectRef};
pub use resume_manager::{CheckpointState, CheckpointStore, FileCheckpointStore, MemoryCheckpointStore};
