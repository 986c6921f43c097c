use crate::SearchEvent;

/// Consumer-side view of a running search, driven by [`SearchEvent`]s.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchProgress {
    total_mosaics: usize,
    estimated_pages: usize,
    mosaic_index: usize,
    page: usize,
    finished: bool,
}

impl SearchProgress {
    pub fn new(total_mosaics: usize, estimated_pages: usize) -> Self {
        Self {
            total_mosaics,
            estimated_pages,
            mosaic_index: 0,
            page: 0,
            finished: false,
        }
    }

    /// Applies an event and returns the status line to show, if any.
    pub fn apply(&mut self, event: &SearchEvent) -> Option<String> {
        match event {
            SearchEvent::MosaicStarted { index, name } => {
                self.mosaic_index = *index;
                self.page = 0;
                Some(format!(
                    "Processing basemap '{name}' ({index}/{})",
                    self.total_mosaics
                ))
            }
            SearchEvent::PageRead { page } => {
                self.page = *page;
                Some(format!(
                    "Downloading quad footprints (page {page} of (estimated) {})",
                    self.estimated_pages
                ))
            }
            SearchEvent::Finished(result) => {
                self.finished = true;
                Some(format!(
                    "Found {} quads in {} basemap instances",
                    result.total_quads(),
                    result.mosaic_count()
                ))
            }
            SearchEvent::Failed(reason) => Some(format!("Quad search failed: {reason}")),
        }
    }

    pub fn mosaic_index(&self) -> usize {
        self.mosaic_index
    }

    pub fn page(&self) -> usize {
        self.page
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}
