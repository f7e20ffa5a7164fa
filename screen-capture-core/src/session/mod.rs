pub mod claims;
pub mod recording;
