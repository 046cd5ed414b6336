//! Built-in provider integrations.

#[cfg(feature = "github")]
pub mod github;
#[cfg(feature = "oura")]
pub mod oura;
#[cfg(feature = "toggl")]
pub mod toggl;
