//! Conversation orchestration for the voice assistant service.

pub mod config;
pub mod orchestrator;
pub mod tools;
