pub mod capabilities;
pub mod client;
pub mod diagnostics;
pub mod documents;
pub mod pool;
pub mod proto;
pub mod symbol;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use client::{LspClient, LspClientOptions};
pub use diagnostics::DiagnosticsStore;
pub use documents::DocumentSession;
pub use pool::{PoolHandle, ServerPool};
pub use proto::{path_to_uri, uri_to_path};
pub use symbol::SymbolNode;
