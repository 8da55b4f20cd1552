pub mod config;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod processor;
pub mod registry;
pub mod sweeper;
pub mod tracker;
pub mod web;
