pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod hypothesis;
pub mod lambda;
pub mod linalg;
pub mod montecarlo;
pub mod normalize;
pub mod odds;
pub mod optim;
pub mod pipeline;
pub mod quantile;
pub mod regression;
pub mod report;
pub mod results;
pub mod special;
pub mod tabular;
