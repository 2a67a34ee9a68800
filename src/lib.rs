pub mod catalog;
pub mod config;
pub mod generator;
pub mod health;
pub mod model;
pub mod output;
pub mod plan;
pub mod rules;
pub mod server;
pub mod store;
pub mod training;
