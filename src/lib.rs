pub mod ble;
pub mod command;
pub mod controller;
pub mod goal;
pub mod intake;
pub mod protocol;
pub mod reminder;
pub mod scheduler;
pub mod session;
pub mod sim;
pub mod state;
pub mod storage;
pub mod system;
pub mod types;

pub use types::*;
pub use controller::*;
