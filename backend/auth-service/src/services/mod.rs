//! Coordinators (C7-C9): the only callers of `registry` and `db`. Each owns
//! exactly one wire-level operation end to end.

pub mod login;
pub mod logout;
pub mod profile_cache;
pub mod refresh;
