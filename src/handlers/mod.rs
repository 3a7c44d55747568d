pub mod auth;
pub mod dbsc;
pub mod session;
