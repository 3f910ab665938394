//! Reversible byte transforms applied to message bodies.
//!
//! A [`Pipeline`] is an ordered list of [`Middleware`] layers. Outbound
//! bytes pass through every layer front to back; inbound bytes pass through
//! the same layers back to front, so `decode(encode(x)) == x` as long as
//! each layer is itself reversible.
//!
//! ```text
//! send:  serialize → layer[0].encode → layer[1].encode → … → frame
//! recv:  frame → … → layer[1].decode → layer[0].decode → deserialize
//! ```
//!
//! The connection's cipher is just another layer; see
//! [`crate::security::SessionCipher`].

pub mod compression;

pub use compression::Compression;

use crate::error::NetResult;

/// A reversible transform over message body bytes.
pub trait Middleware: Send + Sync + std::fmt::Debug {
    /// Short name for diagnostics.
    fn name(&self) -> &'static str;

    /// Transform outbound bytes.
    fn encode(&self, data: Vec<u8>) -> NetResult<Vec<u8>>;

    /// Undo [`Middleware::encode`] on inbound bytes.
    fn decode(&self, data: Vec<u8>) -> NetResult<Vec<u8>>;
}

/// Ordered chain of middleware layers.
#[derive(Debug, Default)]
pub struct Pipeline {
    layers: Vec<Box<dyn Middleware>>,
}

impl Pipeline {
    /// Create an empty pipeline (identity transform).
    pub fn new() -> Self {
        Self { layers: Vec::new() }
    }

    /// Append a layer; it runs last on encode and first on decode.
    pub fn push(&mut self, layer: Box<dyn Middleware>) {
        self.layers.push(layer);
    }

    /// Insert a layer at `index` (clamped to the current length).
    pub fn insert(&mut self, index: usize, layer: Box<dyn Middleware>) {
        let index = index.min(self.layers.len());
        self.layers.insert(index, layer);
    }

    /// Run bytes through every layer in order.
    pub fn encode(&self, data: Vec<u8>) -> NetResult<Vec<u8>> {
        self.layers
            .iter()
            .try_fold(data, |bytes, layer| layer.encode(bytes))
    }

    /// Run bytes through every layer in reverse order.
    pub fn decode(&self, data: Vec<u8>) -> NetResult<Vec<u8>> {
        self.layers
            .iter()
            .rev()
            .try_fold(data, |bytes, layer| layer.decode(bytes))
    }

    /// Layer names in encode order.
    pub fn names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    /// Number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Whether the pipeline is the identity.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }
}
