//! SuperCI GitHub client
//!
//! Implements `superci_core::HostingService` over the GitHub REST API:
//! open pull requests, their latest commit and comments, and commit statuses.

pub mod client;
mod wire;

pub use client::{GitHubClient, API_VERSION, PER_PAGE};
