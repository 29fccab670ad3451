//! # NFe API
//!
//! HTTP surface of the issuance engine.
//!
//! ## Routes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                             NFe API Routes                              │
//! │                                                                         │
//! │  GET    /health                                       liveness + DB     │
//! │  PUT    /tenants/{tenant}                             register tenant   │
//! │  PUT    /tenants/{tenant}/certificate                 upload PKCS#12    │
//! │  GET    /tenants/{tenant}/certificate                 validate          │
//! │  DELETE /tenants/{tenant}/certificate                 remove            │
//! │  POST   /tenants/{tenant}/documents                   issue             │
//! │  POST   /tenants/{tenant}/documents/{key}/cancel      cancellation      │
//! │  POST   /tenants/{tenant}/documents/{key}/corrections correction letter │
//! │  POST   /tenants/{tenant}/documents/{key}/reconcile   reconcile         │
//! │  GET    /tenants/{tenant}/artifacts/{key}/{kind}      xml | pdf         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration
//! Read through [`nfe_sefaz::IssuerConfig::load`]: defaults, then the TOML
//! file, then `NFE_*` environment variables. `RUST_LOG` drives logging.

pub mod error;
pub mod routes;
pub mod state;

// Re-exports
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
