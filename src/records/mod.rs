pub mod engine;
pub mod service;
pub mod types;

pub use engine::RecordSet;
pub use service::{
    BlockedProduct, BulkToggleReport, DomainService, KindStore, RejectedFile, SaveOutcome,
};
