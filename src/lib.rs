pub mod api;
pub mod catalog;
pub mod config;
pub mod domain;
pub mod error;
pub mod genelist;
pub mod genes;
pub mod merge;
pub mod output;
pub mod pipeline;
pub mod store;
pub mod sync;
pub mod tabulate;
