pub mod config;
pub mod host;
pub mod net;
pub mod scheduler;
pub mod state;
pub mod wol;
