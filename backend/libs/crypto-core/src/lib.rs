//! Shared primitives used by more than one auth-core crate. Trimmed to the
//! one thing every caller actually needs: hashing a refresh-credential
//! string before it touches the relational store.
//! The teacher's version of this crate also carried an X25519/sodiumoxide
//! end-to-end-encryption layer and a second, simpler JWT implementation;
//! neither has a counterpart in this spec and both were dropped in the
//! final trim (see DESIGN.md).

pub mod hash;
