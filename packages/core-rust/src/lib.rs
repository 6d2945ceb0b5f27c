//! Terrace Core -- vector data model, distance metrics, and injectable seams.
//!
//! This crate provides the foundation layer for the Terrace search engine:
//!
//! - **Types** ([`types`]): `Vector`, `VectorEntry`, `Thing`, `SourceTable`,
//!   `EntryMetadata` -- the records that flow through clustering, tiering,
//!   and the Parquet codec
//! - **Distance** ([`distance`]): cosine / euclidean / dot-product metrics,
//!   normalised so smaller-is-nearer, plus the unit-norm producer contract
//! - **Clock** ([`clock`]): injectable time source for deterministic tests
//! - **Ids** ([`ids`]): injectable identifier generation (UUID v4 default)

pub mod clock;
pub mod distance;
pub mod ids;
pub mod types;

// Clock
pub use clock::{Clock, ManualClock, SystemClock};

// Distance
pub use distance::{
    check_dimension, cosine_similarity, distance, dot, l2_norm, similarity_from_distance,
    validate_unit_norm, DistanceError, DistanceMetric, DEFAULT_UNIT_NORM_EPSILON,
};

// Ids
pub use ids::{IdGenerator, SequentialIdGenerator, UuidIdGenerator};

// Types
pub use types::{EntryMetadata, SourceTable, Thing, Vector, VectorEntry};
