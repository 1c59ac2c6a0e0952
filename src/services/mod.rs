pub mod combiner;
pub mod goal_model;
pub mod normalizer;
pub mod pipeline;
pub mod schedule_fetcher;
pub mod window;

pub use combiner::*;
pub use goal_model::*;
pub use normalizer::*;
pub use pipeline::*;
pub use schedule_fetcher::*;
pub use window::*;
