//! Rendering, validation and reconfiguration of database configuration files.
//!
//! The pipeline takes config templates in a number of formats (INI, YAML, JSON, TOML, XML, HCL,
//! dotenv and several flavours of properties files), renders them against the cluster they
//! belong to, merges user supplied parameters into the result, validates it and decides whether
//! the change can be applied by reloading the database or requires a restart.
//!
//! The building blocks, leaves first:
//!
//! - [`object`] parses a single file into a [`object::ConfigObject`].
//! - [`loader`] bundles the files of a ConfigMap into a [`loader::ConfigFileCollection`].
//! - [`patch`] diffs two versions of a collection and classifies the change.
//! - [`constraint`] and [`validate`] check files against their parameter schema.
//! - [`render`] renders templates.
//! - [`params`] and [`reconfigure`] tie everything together.
//!
//! Kubernetes objects are never fetched by this crate, everything it reads goes through a
//! [`resource::ResourceReader`].

pub mod constraint;
pub mod loader;
pub mod logging;
pub mod object;
pub mod options;
pub mod params;
pub mod patch;
pub mod reconfigure;
pub mod render;
pub mod resource;
pub mod spec;
pub mod validate;
