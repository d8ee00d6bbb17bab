//! Password verifier (C2). Credential signing/verification lives in
//! `jwt-security`; the two-tier registry lives in `crate::registry`.

pub mod password;
