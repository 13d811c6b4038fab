//! Cohort core library: participant identity resolution.
//!
//! - [`types`] domain records and newtypes
//! - [`record`] flat export rows to typed records
//! - [`normalize`] comparison keys
//! - [`index`] registry lookup index
//! - [`resolver`] ordered-fallback resolution and minting
//! - [`config`] `~/.cohort/config.yaml`

pub mod config;
pub mod error;
pub mod fields;
pub mod index;
pub mod minter;
pub mod normalize;
pub mod record;
pub mod resolver;
pub mod types;

pub use config::Config;
pub use error::{ConfigError, RecordError, ResolveError};
pub use fields::{IntakeFieldMap, RegistryFieldMap};
pub use index::IdentityIndex;
pub use resolver::{BatchState, FacetPolicy, IdentityResolver, ResolverConfig};
pub use types::{
    CandidateRecord, ChildFacet, Demographics, FlatRecord, IdentityId, IdentityRecord, MatchedBy,
    RecordId, ResolutionResult,
};
