//! Pure reconciliation algorithms
//!
//! Synchronous computations over already-loaded data: part instance rank
//! reconciliation and the segment structural diff. Neither suspends or
//! retries; sequencing and persistence belong to the commit pipeline.

pub mod rank;
pub mod segdiff;

pub use rank::{update_part_instance_ranks, PartRankSnapshot};
pub use segdiff::{compile_segment_entries, diff_segment_entries, SegmentChanges, SegmentEntries};
