pub mod client;
pub mod credentials;
pub mod models;

pub use client::{GetnetClient, PaymentGateway};
pub use credentials::{
    spawn_renewal, Authenticator, CredentialCache, CredentialStore, FileCredentialStore,
    GatewayCredential, GetnetAuthenticator, MemoryCredentialStore,
};
pub use models::ApiError;
