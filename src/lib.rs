//! Ensemble Prediction Engine
//!
//! Orchestrates a pool of heterogeneous prediction models into a single
//! calibrated estimate with confidence intervals, attribution, and
//! uncertainty decomposition.
//!
//! ## Architecture
//!
//! ```text
//! Registry → Selector → Inference (parallel) → Weighting → Aggregator
//!     ↑                                                        ↓
//! Performance Monitoring ← Outcome Feedback ← Meta-Learner Correction
//! ```

pub mod aggregator;
pub mod config;
pub mod engine;
pub mod error;
pub mod inference;
pub mod meta;
pub mod registry;
pub mod selector;
pub mod types;
pub mod weighting;
