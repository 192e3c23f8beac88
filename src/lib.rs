pub mod analysis;
pub mod context;
pub mod effect;
pub mod error;
pub mod fact_mgr;
pub mod facts;
pub mod graph;
pub mod options;
pub mod program;
pub mod scenarios;
