//! Concurrent frame retrieval with per-frame failure tolerance.

use chrono::Utc;
use futures::{StreamExt, stream};
use std::{sync::Arc, time::Duration};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, warn};

use crate::{
    error::{RadarError, Result},
    model::{Frame, FrameDescriptor, FrameSet, Region},
    source::ByteSource,
};

#[derive(Debug, Clone)]
pub struct FrameFetcher {
    source: Arc<dyn ByteSource>,
    max_concurrent: usize,
    min_frames: usize,
}

impl FrameFetcher {
    pub fn new(source: Arc<dyn ByteSource>, max_concurrent: usize, min_frames: usize) -> Self {
        Self { source, max_concurrent: max_concurrent.max(1), min_frames }
    }

    /// Fetch every descriptor, waiting for all attempts to finish.
    pub async fn fetch(&self, region: &Region, descriptors: Vec<FrameDescriptor>) -> Result<FrameSet> {
        self.collect(region, descriptors, None).await
    }

    /// Like [`fetch`](Self::fetch), but stop waiting after `budget` and keep
    /// whatever frames have arrived by then.
    pub async fn fetch_within(
        &self,
        region: &Region,
        descriptors: Vec<FrameDescriptor>,
        budget: Duration,
    ) -> Result<FrameSet> {
        self.collect(region, descriptors, Some(Instant::now() + budget)).await
    }

    async fn collect(
        &self,
        region: &Region,
        descriptors: Vec<FrameDescriptor>,
        deadline: Option<Instant>,
    ) -> Result<FrameSet> {
        let requested = descriptors.len();

        let mut pending = stream::iter(descriptors)
            .map(|descriptor| {
                let source = Arc::clone(&self.source);
                async move {
                    let result = source.fetch(&descriptor.id).await;
                    (descriptor, result)
                }
            })
            .buffer_unordered(self.max_concurrent);

        let mut frames = Vec::with_capacity(requested);
        let mut failed = 0usize;

        loop {
            let next = match deadline {
                Some(deadline) => match timeout_at(deadline, pending.next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            fetched = frames.len(),
                            abandoned = requested - frames.len() - failed,
                            "Frame fetch budget exhausted, continuing with frames received"
                        );
                        break;
                    }
                },
                None => pending.next().await,
            };

            let Some((descriptor, result)) = next else { break };
            match result {
                Ok(bytes) => frames.push(Frame { descriptor, bytes }),
                Err(e) => {
                    failed += 1;
                    warn!(
                        frame = %descriptor.timestamp,
                        error = %format!("{e:#}"),
                        "Dropping radar frame that failed to download"
                    );
                }
            }
        }

        if frames.len() < self.min_frames {
            return Err(RadarError::InsufficientFrames {
                required: self.min_frames,
                fetched: frames.len(),
            });
        }

        debug!(requested, fetched = frames.len(), failed, "Radar frames fetched");

        Ok(FrameSet::new(*region, Utc::now(), frames))
    }
}
