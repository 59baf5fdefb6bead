//! LSAC application status portal.
//!
//! This module provides functionality for:
//! - Loading the list of tracked applications from the schools file
//! - Fetching an application's status with a bearer token
//! - Parsing the vendor payload into a [`StatusRecord`]

pub mod client;
pub mod models;
pub mod schools;

pub use client::{LsacClient, PortalClient};
pub use models::{Application, ApplicationIdentifier, StatusRecord};
pub use schools::load_schools;
