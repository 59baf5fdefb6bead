//! LSAC portal authentication.
//!
//! Provides the cached bearer token, the login collaborators that mint new
//! tokens, and the per-run session that decides when to use which.

pub mod login;
pub mod session;
pub mod token;

pub use login::{Authenticator, CommandLogin, Credentials, ManualLogin};
pub use session::Session;
pub use token::{AuthToken, TokenCache};
