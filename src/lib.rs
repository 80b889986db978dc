//! school-portal: data layer for a school community portal.
//!
//! Parents, teachers and school administrators each get a set of
//! resources that load their slice of the portal data, keep
//! loading/error state, and apply writes followed by a reload.
//! Storage sits behind [`store::Store`], with a Postgres backend and an
//! in-memory one for tests and demos.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod notify;
pub mod report;
pub mod resource;
pub mod resources;
pub mod session;
pub mod stats;
pub mod store;
pub mod task;
