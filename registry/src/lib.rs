//! kreg Registry
//!
//! Registry keys and values that join the ambient transaction.
//!
//! Each operation on a [`RegistryKey`] reads the ambient transaction set up by
//! a `kreg_transaction` propagation policy and calls the transacted native
//! entry point when there is one, the plain entry point otherwise.

mod dispatch;
mod error;
mod key;
mod path;
mod root;
mod value;

pub use error::{RegistryError, RegistryResult};
pub use key::RegistryKey;
pub use path::{RegistryPath, SEPARATOR};
pub use root::RootKey;
pub use value::{RegistryValue, ValueError};
