//! Feed ingest: snapshot storage, blueprint evaluation, regeneration and
//! the lock-and-commit pipeline.

pub mod blueprint;
pub mod cache;
pub mod commit;
pub mod handlers;

pub use blueprint::{Blueprint, BlueprintRundown, BlueprintSegment, PassthroughBlueprint};
pub use cache::{IngestCache, IngestWriteOps};
pub use commit::{run_ingest_update, run_ingest_update_forced, ForceRegen, IngestContext};
