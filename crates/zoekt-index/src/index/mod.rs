pub mod builder;
pub mod dir;
pub(crate) mod postings;

pub use builder::IndexBuilder;
pub use dir::DirectoryIndexer;
