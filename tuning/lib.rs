#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
//! Pre-processing chains and versioned binned efficiency archives used to
//! prepare Ringer calorimeter patterns for tuning.

pub mod base_info;
pub mod config;
pub mod layout;
pub mod raw;

#[path = "../preproc/mod.rs"]
pub mod preproc;

#[path = "../archive/mod.rs"]
pub mod archive;

#[path = "../create/mod.rs"]
pub mod create;
