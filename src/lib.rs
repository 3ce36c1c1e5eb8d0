//! Parameter grid runs of the KOSMA-tau PDR code.
//!
//! A run expands a grid of physical parameters into parameter sets, records
//! them as jobs in a relational store and runs each job in a private
//! sandbox, keeping results and their provenance.

/// Read and validate the run configuration
pub mod config;

/// Models, parameter sets, jobs and results in a relational store
pub mod db;

/// Turn a parameter grid into jobs and run them
pub mod dispatch;

/// Input file formats understood by the PDR code
pub mod format;

/// Parameter grids and their canonical string codes
pub mod grid;

/// Physical parameter vectors derived from grid points
pub mod parameters;

/// Digests and version information of executables and results
pub mod provenance;

/// Stage, run and collect a single job
pub mod sandbox;

/// Where result files are kept
pub mod storage;

/// Render input files from templates
pub mod template;
