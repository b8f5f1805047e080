// Mapping: profiles (rules as data), the registry that holds them, and the
// engine that applies a profile to a transaction set's segments.

pub mod engine;
pub mod profile;
pub mod registry;

pub use engine::{apply, NormalizedDocument};
pub use profile::{profile_key, standard_loop_segment, MappingProfile, MappingRule, ProfileIssue, Qualifier};
pub use registry::MappingRegistry;
