pub mod captioning;
pub mod generation;
pub mod http;
pub mod notification;
pub mod queue;
pub mod storage;
