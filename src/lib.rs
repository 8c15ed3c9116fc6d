//! rbit EPUB builder
//!
//! This library provides the core functionality for the rbit-epub worker,
//! which turns queued build requests into EPUB files by fetching a
//! collection's complete zip and running the oer.exports `content2epub.py`
//! conversion script against it.

pub mod app_state;
pub mod config;
pub mod models;
pub mod runner;
pub mod services;
