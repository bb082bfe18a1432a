//! Reference collaborators for in-process delivery.
//!
//! [`Resolver::local`](crate::Resolver::local) wires [`LocalPipeline`],
//! [`InlineDispatcher`] and [`AddressRouter`] together.

mod dispatcher;
mod pipeline;
mod router;

pub use dispatcher::{InlineDispatcher, SpawnDispatcher};
pub use pipeline::LocalPipeline;
pub use router::AddressRouter;
