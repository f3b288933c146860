pub mod camera;
pub mod compose;
pub mod config;
pub mod error;
pub mod joystick;
pub mod printer;
pub mod session;
pub mod status;
pub mod store;
pub mod web;
