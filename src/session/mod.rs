pub mod states;
pub mod supervisor;

pub use states::{SessionInput, SessionMachine, SessionOutput};
pub use supervisor::{ConnectionSupervisor, SupervisorEvent};
