pub mod authenticator;
pub mod cra;
