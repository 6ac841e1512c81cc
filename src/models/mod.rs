pub mod game;
pub mod server;
