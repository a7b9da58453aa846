pub mod citymodel;
pub mod cli;
pub mod config;
pub mod convert;
pub mod db;
pub mod error;
pub mod export;
pub mod geom;
pub mod grid;
pub mod query;
