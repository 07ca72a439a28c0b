pub mod sampler;
pub mod greedy;

pub use sampler::{Sampler, TokenId};
pub use greedy::{argmax, GreedySampler};
