//! Grouping, connected components and coefficient normalization for
//! regressions with categorical fixed effects.
//!
//! # Pipeline
//!
//! ```text
//! categorical columns ──group──▶ GroupedArray ──▶ FixedEffect
//!                                                    │
//!                     solver (raw coefficients) ◀────┤
//!                                │                   │
//!                                ▼                   ▼
//!                           normalize ◀──────── components
//!                                │
//!                                ▼
//!                      canonical coefficients ──full──▶ per-observation values
//! ```
//!
//! - [`group`]: dense integer partitions, `0` reserved for missing
//! - [`fixed_effect`]: a partition plus an interaction series
//! - [`components`]: groups linked by shared observations
//! - [`normalize`]: canonical coefficients, and [`full`] to expand them
//! - [`solver`]: CPU alternating-projections solver producing raw coefficients
//! - [`singletons`]: observations alone in their group
//!
//! Python bindings are available behind the `python` feature.

pub mod components;
pub mod errors;
pub mod fixed_effect;
pub mod group;
pub mod normalize;
pub mod singletons;
pub mod solver;

#[cfg(feature = "python")]
mod python;

pub use components::{components, Component};
pub use errors::{FixedEffectError, Result};
pub use fixed_effect::{FixedEffect, Interaction};
pub use group::{group, group_columns, group_factorized, group_many, GroupInput, GroupedArray};
pub use normalize::{full, normalize, normalize_in_place};
pub use singletons::detect_singletons;
pub use solver::{
    solve_coefficients, solve_residuals, solve_residuals_columns, ColumnsResult,
    ConvergenceState, SolveResult, SolverConfig,
};
