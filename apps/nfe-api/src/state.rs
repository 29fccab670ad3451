//! Shared application state.

use std::sync::Arc;

use nfe_db::Database;
use nfe_sefaz::{EventProcessor, IssuancePipeline, IssuerConfig, IssuerContext, NumberVoider};

/// Everything a handler needs, shared behind an `Arc`.
pub struct AppState {
    pub ctx: Arc<IssuerContext>,
    pub pipeline: IssuancePipeline,
    pub events: EventProcessor,
    pub voider: NumberVoider,
}

impl AppState {
    pub fn new(config: &IssuerConfig, db: Database) -> Self {
        Self::from_context(Arc::new(IssuerContext::new(config, db)))
    }

    pub fn from_context(ctx: Arc<IssuerContext>) -> Self {
        AppState {
            pipeline: IssuancePipeline::new(ctx.clone()),
            events: EventProcessor::new(ctx.clone()),
            voider: NumberVoider::new(ctx.clone()),
            ctx,
        }
    }

    pub fn db(&self) -> &Database {
        &self.ctx.db
    }
}
