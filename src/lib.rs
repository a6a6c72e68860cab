//! Seeding fully compressible convection runs from truncated-thermodynamics
//! (TT) runs: averaged TT statistics drive a boundary-value problem for the
//! full-thermodynamics (FT) mean structure, and the TT state is rescaled onto
//! it.

pub mod atmosphere;
pub mod bvp;
pub mod newton;

pub mod checkpoint;
pub mod output;
pub mod statistics;

pub mod comm;
pub mod domain;
pub mod rescale;
pub mod tt_to_ft;

pub mod error;
pub mod parameters;
pub mod utils;
