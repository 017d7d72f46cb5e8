//! Valet Sim: command-line driver for the valet facility simulation.
//!
//! - Runs a supervisor until its arrivals end, a deadline passes, or Ctrl-C
//! - Folds the event stream into a JSON-serializable run summary

pub mod report;
pub mod runner;
