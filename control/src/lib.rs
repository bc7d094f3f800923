//! Control plane registry for a fleet of remote daemons.
//!
//! [`services::NodeRegistry`] owns the fleet: it restores persisted nodes at
//! startup, falls back to discovering a daemon on the local host, supervises
//! every connection and exposes CRUD over node configs. [`api`] serves that
//! over HTTP.

pub mod api;
pub mod db;
pub mod services;
pub mod types;
