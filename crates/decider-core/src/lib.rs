//! Decider Core
//!
//! Core domain types, ports, and error handling for the Decider CI decision
//! engine. This crate defines the job descriptor, the content-addressed cache
//! key, trigger input, run configuration and the interfaces to the execution
//! backend and source-state provider.

pub mod cache;
pub mod config;
pub mod error;
pub mod ids;
pub mod job;
pub mod memory;
pub mod ports;
pub mod task;
pub mod trigger;

pub use cache::{CacheKey, CacheKeyResolver, SourceSnapshot};
pub use config::RunConfig;
pub use error::{Error, Result};
pub use ids::*;
pub use job::{JobBuilder, JobDescriptor, JobRef, Platform, ReusePolicy, Step};
pub use trigger::{Trigger, TriggerKind};
