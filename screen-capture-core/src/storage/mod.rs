pub mod inspect;
pub mod layout;
pub mod metadata;
pub mod segment_writer;
