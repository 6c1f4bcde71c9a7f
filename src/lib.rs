//! # Shed Core Library
//!
//! This crate contains the core logic of the `shed` tool – a version-pinning manager for
//! command line tools that are built from source, such as the ones installed with `go install`.
//!
//! `shed` records the exact version of every tool a project uses in a `shed.lock` file,
//! builds each tool once into a shared cache and lets the whole team run identical
//! versions on every machine.
//!
//! This library is built for the `shed` CLI, but you can also reuse it as a backend in other tools.
//!
//! ## Modules Overview
//! - [`tool`] – Tools, import paths, short names and `name@version` specs
//! - [`lock`] – The `shed.lock` data model and its text format
//! - [`builder`] – The build backends that resolve versions and produce executables
//! - [`global`] – The shared build cache and its default location
//! - [`installer`] – Install sets: resolving requested changes and applying them concurrently
//! - [`client`] – The [`Shed`] client tying lockfile and cache together
//! - [`error`] – Error types
//! - [`util`] – Shared utilities (target triple, path escaping, executable checks)


pub mod tool;
pub mod lock;
pub mod builder;
pub mod util;
pub mod installer;
pub mod client;
pub mod error;
pub mod global;

pub use tool::*;
pub use installer::*;
pub use lock::*;
pub use builder::*;
pub use client::*;
pub use error::*;
pub use global::cache::*;
