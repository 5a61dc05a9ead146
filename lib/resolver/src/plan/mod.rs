pub mod fetch;
pub mod node;
pub mod response;
