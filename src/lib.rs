pub mod aggregate;
pub mod config;
pub mod convert;
pub mod discovery;
pub mod output;
pub mod parser;
pub mod stats;
pub mod vintage;
