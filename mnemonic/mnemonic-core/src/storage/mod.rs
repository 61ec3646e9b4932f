pub mod bytestore;
pub mod container;
pub mod metrics;
pub mod path;

pub use bytestore::{BlobLocation, ByteStore};
pub use container::ContainerEntry;
pub use path::{Segment, StoragePath};
