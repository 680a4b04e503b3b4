pub mod forward;
pub mod reverse;
