//! archoffline library exports.
//!
//! The binary is a thin clap front end over these modules; integration
//! tests drive [`pipeline::Pipeline`] against a scripted host.

pub mod aur;
pub mod clean;
pub mod commands;
pub mod common;
pub mod config;
pub mod environment;
pub mod error;
pub mod image;
pub mod mirrors;
pub mod packages;
pub mod pacman_conf;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod prompt;
pub mod qemu;
pub mod repo;
pub mod sandbox;
pub mod timing;
