pub mod dto;
pub mod names;
pub mod validate;
pub mod yaml;
