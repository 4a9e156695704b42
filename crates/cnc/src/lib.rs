//! Control hub distributing relabel rules to collection agents and the live
//! agent inventory to UIs.

pub mod api;
pub mod config;
pub mod hub;
pub mod rules;
pub mod ws;
