pub mod adapt;
pub mod summarize;
pub mod validate;
pub mod variants;
