pub mod insight;
pub mod metric;
pub mod token;
pub mod user;

pub use insight::{Insight, InsightType, NewInsight};
pub use metric::{FitnessMetric, NewFitnessMetric};
pub use token::{GoogleFitToken, NewGoogleFitToken};
pub use user::{UpsertUser, User};
