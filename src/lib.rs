pub mod chat;
pub mod consts;
pub mod events;
pub mod fetch;
pub mod offload;
pub mod session;
