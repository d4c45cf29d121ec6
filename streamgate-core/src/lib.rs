//! Streamgate Core functionality.
//!
//! This crate contains the domain models, packet parsing, flow-rule primitives,
//! address learning, backend selection and the packet-in director that power the
//! Streamgate video load-balancing controller.

pub mod error;

/// Backends, switches and the shared registries built around them.
pub mod domain {
    pub mod backend;
    pub mod routing;
    pub mod switch;
}

/// Wire-level parsing of the frames carried in packet-in notifications.
pub mod packet {
    pub mod arp;
    pub mod ethernet;
    pub mod frame;
    pub mod ipv4;
}

/// Flow rules, commands and the one-way control channel to the switches.
pub mod flow {
    pub mod channel;
    pub mod command;
    pub mod rule;
}

/// Per-switch address learning tables.
pub mod learning {
    pub mod store;
}

/// Backend selection algorithms and the policy engine.
pub mod load_balancer {
    pub mod engine;
    pub mod selector;
}

/// The packet-in classifier and its forwarding handlers.
pub mod director {
    pub mod classifier;
    mod handlers;
}

#[cfg(test)]
pub(crate) mod testing;

pub use director::classifier::{Decision, Director, DirectorConfig, FloodReason};
pub use domain::backend::{Backend, BackendId, BackendSpec, BackendStatistics, QualityTier};
pub use domain::switch::{CounterBook, PortNo, SwitchCounters, SwitchId, SwitchRegistry, SwitchState};
pub use error::{AlgorithmParseError, PacketError, PolicyError, RedirectError};
pub use flow::channel::ControlChannel;
pub use flow::command::{Command, ControlEvent, PacketIn, Payload};
pub use learning::store::AddressLearningStore;
pub use load_balancer::engine::PolicyEngine;
pub use load_balancer::selector::Algorithm;
