//! Data models for the taxonomy pipeline

pub mod record;
pub mod taxonomy;

pub use record::{Axis, AxisSelection, DirectionRecord, IndexedRecord};
pub use taxonomy::{
    Assignment, L1Category, L2Entry, L2Item, MappingRow, OrphanLabel, SubCategory,
    TopicCandidate, NOISE_TOPIC_ID,
};
