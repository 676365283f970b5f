//! Destination repositories backing the registry facade.
//!
//! Two implementations of the [`backend_driver::DestRepo`] contract live
//! here: [`RemoteRepo`], which speaks the OCI Distribution API over HTTP,
//! and [`MemoryRegistry`], an in-memory stub used by tests. The facade's
//! backend factory is the single swap point between them.

mod memory;
mod remote;

pub use memory::MemoryRegistry;
pub use remote::RemoteRepo;
