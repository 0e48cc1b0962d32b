//! Typed query functions over the mediakiln schema.

pub mod rendition_cache;
pub mod transcode_jobs;
