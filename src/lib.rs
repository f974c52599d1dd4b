pub mod alerts;
pub mod channel;
pub mod feed;
pub mod logging;
pub mod sim;
pub mod state;
pub mod update;
