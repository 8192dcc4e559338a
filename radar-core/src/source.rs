//! Collaborator seams: where frame listings and image bytes come from.

use async_trait::async_trait;
use std::{fmt::Debug, sync::Arc};

use crate::model::{FrameDescriptor, RadarProduct, Region};

pub mod geomet;
pub mod http;

pub use geomet::GeoMetDirectory;
pub use http::HttpSource;

/// Retrieves raw bytes for a URL or identifier.
///
/// Implementations must fail on a non-success status rather than return an
/// error page as bytes.
#[async_trait]
pub trait ByteSource: Send + Sync + Debug {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>>;
}

/// Lists the radar snapshots currently available for a product and region.
///
/// An empty list is a valid answer.
#[async_trait]
pub trait FrameDirectory: Send + Sync + Debug {
    async fn list(
        &self,
        product: &RadarProduct,
        region: &Region,
    ) -> anyhow::Result<Vec<FrameDescriptor>>;
}

#[async_trait]
impl<T: ByteSource + ?Sized> ByteSource for Arc<T> {
    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        (**self).fetch(url).await
    }
}

#[async_trait]
impl<T: FrameDirectory + ?Sized> FrameDirectory for Arc<T> {
    async fn list(
        &self,
        product: &RadarProduct,
        region: &Region,
    ) -> anyhow::Result<Vec<FrameDescriptor>> {
        (**self).list(product, region).await
    }
}
