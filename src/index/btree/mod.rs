pub mod codec;
pub mod error;
pub mod internal;
pub mod iterator;
pub mod leaf;
pub mod node;
pub mod tree;

pub use codec::KeyCodec;
pub use error::BTreeError;
pub use iterator::TreeIterator;
pub use tree::BPlusTree;
