//! Persisted document model
//!
//! Rundown -> Segment -> Part are the mutable template documents replaced
//! wholesale by ingest regeneration. PartInstance is the realized copy of a
//! Part once selected for playout and is only ever mutated by rank
//! reconciliation, reset, or orphan transitions. RundownPlaylist groups
//! rundowns and carries the on-air selection pointers.

pub mod ingest_data;
pub mod part;
pub mod part_instance;
pub mod piece;
pub mod playlist;
pub mod rundown;
pub mod segment;

pub use ingest_data::{IngestCacheData, IngestDataCacheRow, IngestPart, IngestRundown, IngestSegment};
pub use part::Part;
pub use part_instance::{PartInstance, PartInstanceOrphaned};
pub use piece::Piece;
pub use playlist::{RundownPlaylist, SelectedPartInstance};
pub use rundown::{Rundown, RundownOrphaned};
pub use segment::{Segment, SegmentOrphaned};
