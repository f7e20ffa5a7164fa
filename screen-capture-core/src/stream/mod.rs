pub mod capture_stream;
pub mod sink;
