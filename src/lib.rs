mod adapter;
mod bus_types;
mod catalog;
mod compare;
mod config;
mod dc;
mod engine;
mod error;
mod handoff;
mod idx;
mod indicators;
mod matpower;
mod mpc;
mod mpopt;
mod nem;
mod newton;
mod opf;
mod order;
mod pf;
mod report;
mod sbus;
mod scenario;
mod solve;
mod sparse;
mod summary;
mod traits;
mod ybus;

pub mod format;
pub mod study;

pub use adapter::*;
pub use bus_types::*;
pub use catalog::*;
pub use compare::*;
pub use config::*;
pub use engine::*;
pub use error::*;
pub use handoff::*;
pub use indicators::*;
pub use matpower::*;
pub use mpc::*;
pub use mpopt::*;
pub use nem::*;
pub use opf::*;
pub use order::*;
pub use pf::*;
pub use report::*;
pub use sbus::*;
pub use scenario::*;
pub use solve::*;
pub use sparse::*;
pub use summary::*;
pub use traits::*;
pub use ybus::*;
