pub mod config;
pub mod messages;
pub mod robot;
pub mod runtime;
pub mod teleop;
