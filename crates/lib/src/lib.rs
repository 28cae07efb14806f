//! # Tools for air-gapped infrastructure work
//!
//! This crate implements the `cli-onprem` commands: saving container
//! images as tar archives, splitting large payloads into checksummed
//! chunks, listing the images a Helm chart uses, managing S3 credential
//! profiles and a few smaller utilities. Most commands are thin wrappers
//! around external tools (`docker`, `helm`, `tar`, `split`, `sha256sum`).

pub mod cli;
pub mod config;
pub mod credential;
mod docker;
mod fatpack;
mod helm;
pub mod pull;
mod s3_share;
mod scan;
