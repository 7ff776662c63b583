//! HTTP API: webhook ingestion, job inspection, health and metrics.

pub mod app;
