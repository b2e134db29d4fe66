//! Statistical baseline-deviation detection: a per-(day-of-week, hour,
//! minute) historical baseline and a z-score pass over the evaluation
//! window. Both halves are pure over in-memory rows; the detection cycle
//! wires them to the store.

mod baseline;
mod score;


pub use baseline::{build_baseline, Baseline, BaselineBucket, BucketKey};
pub use score::score_anomalies;
