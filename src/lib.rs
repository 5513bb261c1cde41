//! sitekeeper provisions one Docker container per site.
//!
//! Site requests are validated and recorded by the [`manager`], queued, and
//! turned into running containers by a single [`worker`] that builds a
//! container spec, wires up networks and writes the outcome back to the
//! site row.

pub mod config;
pub mod manager;
pub mod site;
pub mod tasks;
pub mod worker;
