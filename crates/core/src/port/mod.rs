// Port Layer - Interfaces for external collaborators

pub mod crm_store;
pub mod email_transport;
pub mod id_provider; // For deterministic testing
pub mod sequence_repository;
pub mod time_provider;

// Re-exports
pub use crm_store::CrmPropertyStore;
pub use email_transport::{DeliveryError, EmailTransport, SendReceipt};
pub use id_provider::IdProvider;
pub use sequence_repository::SequenceRepository;
pub use time_provider::TimeProvider;
