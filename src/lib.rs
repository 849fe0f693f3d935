pub mod archive;
pub mod config;
pub mod drive;
pub mod graph;
pub mod output;
