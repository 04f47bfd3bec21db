//! subscription-service: usage quotas and recurring Pro billing for AI analyses.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;

pub use startup::{AppState, Application, Stores};
