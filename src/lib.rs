//! Shaderlens: real-time webcam filter viewer
//!
//! Captures video from a webcam, runs it through a catalog of GPU filter
//! programs with live-adjustable parameters, and displays the result.

pub mod capture;
pub mod catalog;
pub mod config;
pub mod controls;
pub mod error;
pub mod frame;
pub mod output;
pub mod params;
pub mod render_loop;
pub mod shader;
pub mod source;
pub mod utils;
