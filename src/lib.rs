pub mod checkpoint;
pub mod config;
pub mod daemon;
pub mod errors;
pub mod executor;
pub mod gates;
pub mod graph;
pub mod lifecycle;
pub mod logging;
pub mod phase;
pub mod process;
pub mod spec_dir;
pub mod steps;
pub mod store;
pub mod unblock;
pub mod util;
pub mod worker;
