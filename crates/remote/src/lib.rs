//! Backend clients for the gallery sync engine: the delta-change RPC pair
//! and object storage for image assets. Both implement the transport traits
//! from `atelier-core`, so the engine never sees HTTP.

mod blob;
mod client;
mod error;

#[cfg(test)]
pub(crate) mod testing;

pub use blob::BlobStoreClient;
pub use client::GalleryApiClient;
pub use error::{RemoteApiError, Result};
