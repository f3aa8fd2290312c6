pub mod cache;
pub mod index;
pub mod watcher;

pub use cache::SymbolCache;
pub use index::{
    IndexEvent, IndexStats, SymbolEntry, SymbolIndex, SymbolQuery, SymbolSource,
};
pub use watcher::IndexWatcher;
