pub mod capability_provider;
pub mod capture_session;
pub mod capture_source;
pub mod claim_registry;
pub mod session_delegate;
