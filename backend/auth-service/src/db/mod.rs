//! Relational repositories (C4 consumers): the principal read projection,
//! the refresh-record table the credential registry mutates, and the
//! persistent cold-tier cache.

pub mod cache_repo;
pub mod principal_repo;
pub mod refresh_repo;
