//! mps-mapping
//!
//! Local-to-marketplace taxonomy mapping (categories, brands, attributes):
//! manual, fuzzy auto-mapping, and externally scored assisted mapping over a
//! pluggable [`MappingStore`].

pub mod resolver;
pub mod similarity;
pub mod store;

pub use resolver::{
    AssistedScorer, BulkReport, MapOutcome, MappingCandidate, MappingResolver, RemoteEntity,
    Suggestion,
};
pub use store::{InMemoryMappingStore, MappingStore, Upsert};
