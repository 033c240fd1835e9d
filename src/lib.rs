pub mod bot;
pub mod config;
pub mod keep_alive;
pub mod qr;
pub mod supervisor;
