//! Remote worker integration.

pub mod client;
pub mod dispatch;

pub use client::{AgentClient, AgentInfo};
pub use dispatch::{DispatchClient, DispatchOutcome};
