pub mod forward;
pub mod links;
pub mod registry;
pub mod reverse;
