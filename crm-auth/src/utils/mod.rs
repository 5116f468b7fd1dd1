pub mod password;
pub mod validation;

pub use password::{CredentialHasher, Password, PasswordHashString, PasswordPolicy, PasswordStrength};
pub use validation::ValidatedJson;
