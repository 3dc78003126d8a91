pub mod cleanup;
pub mod client;
pub mod copier;
pub mod credentials;
