//! Rastreio Metrics API Library
//!
//! HTTP backend of the marketing-analytics dashboard: ingests ad-spend and
//! lead-message data pushed by automation flows, syncs WhatsApp leads from
//! the Graph API, and serves the aggregated metrics the dashboard polls.
//!
//! # Modules
//!
//! - `aggregates`: Pure reconciliation math (daily merge, CPL, champion).
//! - `config`: Configuration management.
//! - `db`: Database connection and pool management.
//! - `db_storage`: Upsert writer for ingestion batches.
//! - `errors`: Error handling types.
//! - `handlers`: Read-side HTTP request handlers.
//! - `identity`: Lead identity hashing and transaction ids.
//! - `ingest_handler`: POST /ingest handler.
//! - `ingest_models`: Ingestion payload shapes and the record normalizer.
//! - `localtime`: São Paulo day arithmetic.
//! - `meta_client`: Meta Marketing/Graph API client.
//! - `meta_models`: Graph API payload models and action parsers.
//! - `models`: Row and response models.
//! - `sync_handler`: Combined sync trigger and its rate limit.
//! - `whatsapp_sync`: WhatsApp message sync job.

pub mod aggregates;
pub mod config;
pub mod db;
pub mod db_storage;
pub mod errors;
pub mod handlers;
pub mod identity;
pub mod ingest_handler;
pub mod ingest_models;
pub mod localtime;
pub mod meta_client;
pub mod meta_models;
pub mod models;
pub mod sync_handler;
pub mod whatsapp_sync;
