//! Shared utilities for portal-scraper integration tests.
//!
//! - `fakes`: scripted portal, extractors and storage backends
//! - `harness`: a `JobManager` wired to the fakes inside a temp directory
//! - `portal_server`: a minimal HTTP portal for exercising `HttpPortal`

#![allow(dead_code)]

pub mod fakes;
pub mod harness;
pub mod portal_server;

pub use fakes::*;
pub use harness::*;
