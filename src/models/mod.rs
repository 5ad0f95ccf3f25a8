pub mod message;
pub mod registration;
pub mod request;
