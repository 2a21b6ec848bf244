//! # Octopoes Core
//!
//! Consistency engine for the Octopoes asset graph. It keeps track of why
//! every object exists, derives new objects through inference bits, computes
//! how intensively each object may be scanned, and publishes every change so
//! downstream workers can react to it.
//!
//! ## Architecture
//!
//! - [`database`]: bitemporal store port, query construction, the
//!   transactional [`database::Session`] and the XTDB / in-memory adapters
//! - [`repositories`]: typed access to objects, origins, origin parameters
//!   and scan profiles, including merge-on-write and change events
//! - [`events`]: change events, the batched [`events::EventManager`] and the
//!   message broker port
//! - [`bits`]: inference rule definitions and the built-in bits
//! - [`service`]: the [`service::ConsistencyService`] that dispatches events,
//!   runs inference and recalculates scan levels

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

/// Inference rules and the built-in bits
pub mod bits;
/// Bitemporal store access, sessions and store adapters
pub mod database;
pub mod error;
/// Change events, batching publisher and broker
pub mod events;
/// Typed persistence for objects, origins, parameters and scan profiles
pub mod repositories;
/// Consistency service: event dispatch, inference, scan levels
pub mod service;

pub use error::{OctopoesError, OptionalExt, Result};
