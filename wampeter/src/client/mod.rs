mod client;
mod session;

pub use client::{
    Client,
    NotConnectedError,
};
pub use session::{
    EstablishedSession,
    HelloDetails,
    Session,
    SessionConfig,
    SessionEvent,
    SessionState,
};
