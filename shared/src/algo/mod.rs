//! Numeric helpers: deterministic parallel seeding and statistics.

pub mod parallel;
pub mod stats;

pub use parallel::{derive_seed, worker_rng};
pub use stats::{
    ks_critical_value, ks_statistic, mean_and_variance, normal_cdf, truncated_normal_cdf,
};
