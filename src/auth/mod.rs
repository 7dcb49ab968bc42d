pub mod auth_response;

pub use auth_response::{AuthError, AuthResponse, KeyDecryptor, SecretKey};
