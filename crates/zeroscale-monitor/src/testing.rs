//! Shared test doubles for the monitor suites.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use zeroscale_state::{IntentSink, ScaleIntent};

/// Sink that records every submitted intent.
pub(crate) struct RecordingSink {
    intents: Mutex<Vec<ScaleIntent>>,
}

impl RecordingSink {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            intents: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn intents(&self) -> Vec<ScaleIntent> {
        self.intents.lock().clone()
    }
}

#[async_trait]
impl IntentSink for RecordingSink {
    async fn submit(&self, intent: ScaleIntent) -> anyhow::Result<()> {
        self.intents.lock().push(intent);
        Ok(())
    }
}
