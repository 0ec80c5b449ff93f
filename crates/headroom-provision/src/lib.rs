//! headroom-provision: changes the desired capacity of a managed resource.
//!
//! The [`Provisioner`] trait is the seam the scale driver talks to;
//! [`TerraformCli`] is the production implementation (`init`, `apply`,
//! `show -json`). Read failures and apply failures are separate error types
//! because callers recover from them differently.

pub mod error;
pub mod terraform;

use std::future::Future;
use std::pin::Pin;

pub use error::{ProvisionError, StateReadError, Step};
pub use terraform::{TerraformCli, desired_size_from_show};

/// Boxed future alias for provisioner operations.
pub type ProvisionFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// External system that owns the authoritative desired size.
pub trait Provisioner: Send + Sync {
    /// Read the current desired size.
    fn current_desired_size(&self) -> ProvisionFuture<'_, Result<u32, StateReadError>>;

    /// Set the desired size and wait for the change to complete.
    ///
    /// Dropping the returned future must abandon the change (kill any child
    /// process) so the caller can enforce a timeout.
    fn apply(&self, desired_size: u32) -> ProvisionFuture<'_, Result<(), ProvisionError>>;
}
