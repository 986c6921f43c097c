use crate::{BoundingBox, Mosaic, Quad, QuadSearchError};
use async_trait::async_trait;

/// A lazily fetched sequence of quad pages for one mosaic.
#[async_trait]
pub trait QuadPager: Send {
    /// Fetches the next page, `None` once the sequence is exhausted.
    async fn next_page(&mut self) -> Result<Option<Vec<Quad>>, QuadSearchError>;
}

#[async_trait]
pub trait QuadIndex: Send + Sync {
    async fn quads_for_mosaic(
        &self,
        mosaic: &Mosaic,
        bbox: &BoundingBox,
    ) -> Result<Box<dyn QuadPager>, QuadSearchError>;

    async fn one_quad(&self, mosaic: &Mosaic) -> Result<Option<Quad>, QuadSearchError>;
}
