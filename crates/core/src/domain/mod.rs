// Domain Layer - Pure business logic and entities

pub mod contact;
pub mod error;
pub mod job;
pub mod qualification;
pub mod sequence;

// Re-exports
pub use contact::{parse_contacts, Contact, ContactId, ContactProperties, RawContact};
pub use error::DomainError;
pub use job::{Job, JobId, JobState, QueueId};
pub use qualification::{LeadType, QualificationResult, TemplateSet};
pub use sequence::{SendStep, SequenceProperties, SequenceState, SequenceStatus};
