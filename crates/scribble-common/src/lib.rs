pub mod phase;
pub mod protocol;
pub mod words;
