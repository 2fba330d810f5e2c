#![forbid(unsafe_code)]

//! Facade over the votealign workspace: one dependency pulls in the
//! scoring kernel, the staging store, the relational macros, the
//! materialization pipeline, and the validator.

pub use va_io as io;
pub use va_macros as macros;
pub use va_pipeline as pipeline;
pub use va_score as score;
pub use va_store as store;
pub use va_types as types;
pub use va_validate as validate;

pub use va_score::{NO_DATA_SCORE, ScoreInput, ScorePair, ScoringMethod};
pub use va_types::{NO_PARTY, VoteDistribution};
