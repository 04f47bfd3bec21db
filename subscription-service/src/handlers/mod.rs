//! HTTP handlers for subscription-service.

pub mod billing_callback;
pub mod health;
pub mod subscription;
pub mod usage;
pub mod webhook;
