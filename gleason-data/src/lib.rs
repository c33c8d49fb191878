//! Record preparation toolkit for Gleason-graded histopathology
//! patches.
//!
//! The crate covers the road from a directory of labeled patch images
//! to normalized training batches: scanning a split
//! ([`dataset::scan_split`]), packing it into a record container
//! ([`container::ContainerBuilder`]), computing split statistics
//! ([`stats`]), and streaming augmented batches back out
//! ([`loader::TrainingStream`]).

mod common;

pub mod config;
pub mod container;
pub mod dataset;
pub mod error;
pub mod label;
pub mod loader;
pub mod processor;
pub mod record;
pub mod stats;
pub mod utils;
