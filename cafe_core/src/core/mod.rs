pub mod connection_manager;
pub mod envelope;
pub mod permissions;
pub mod session;
