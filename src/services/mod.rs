pub mod collaborators;
pub mod lifecycle;
pub mod orchestrator;
pub mod poller;
pub mod transport;
