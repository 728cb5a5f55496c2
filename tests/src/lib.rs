//! # Broker-RPC Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── support/          # Scripted transport, commands, fake responders
//! └── integration/      # Requester <-> broker <-> responder flows
//!     ├── round_trip.rs
//!     ├── failure_paths.rs
//!     ├── lifecycle.rs
//!     └── race_properties.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p rpc-tests
//!
//! # By category
//! cargo test -p rpc-tests integration::failure_paths::
//!
//! # Benchmarks
//! cargo bench -p rpc-tests
//! ```

#![allow(unused_variables)]
#![allow(unused_imports)]
#![allow(dead_code)]

pub mod support;
