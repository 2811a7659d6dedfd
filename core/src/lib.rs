//! kreg Core Types
//!
//! This crate provides the native boundary shared by the rest of kreg:
//! - Handle types (TransactionHandle, KeyHandle and the predefined roots)
//! - Native error codes and the normalization of failure conventions
//! - Registry value type codes and key access rights
//! - The injected capability traits (KtmApi, RegistryApi)

mod access;
mod api;
mod error;
mod handle;
pub mod outcome;
mod value_type;

pub use access::*;
pub use api::*;
pub use error::*;
pub use handle::*;
pub use value_type::*;
