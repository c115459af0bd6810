//! Credentials for remote MCP servers
//!
//! # Module Layout
//!
//! - [`installation`] -- Installed servers, their credentials, and the
//!   [`installation::InstallationStore`] persistence seam
//! - [`refresh`]      -- OAuth `refresh_token` grant and the
//!   [`refresh::InstallationTokenManager`] that persists its results

pub mod installation;
pub mod refresh;
