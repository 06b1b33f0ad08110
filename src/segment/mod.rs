//! Immutable on-disk segments: block codec, sparse index, docs, writer,
//! searcher, merger, and the merge policy.

pub mod block;
pub mod docs;
pub mod index;
pub mod info;
pub mod merge_policy;
pub mod merger;
pub mod searcher;
pub mod writer;

pub use block::DEFAULT_BLOCK_SIZE;
pub use docs::SegmentDocs;
pub use index::SegmentIndex;
pub use info::SegmentInfo;
pub use merge_policy::{MergePolicyConfig, TieredMergePolicy};
pub use merger::{MergeSource, SegmentMerger};
pub use searcher::{verify_segment_data, SegmentSearcher};
pub use writer::SegmentWriter;
