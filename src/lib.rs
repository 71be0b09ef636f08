pub mod cli;
pub mod config;
pub mod errors;
pub mod pipeline;
pub mod store;
pub mod tools;
pub mod utils;
