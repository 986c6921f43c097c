//! Background quad search.
//!
//! A [`QuadFinder`] walks every selected mosaic in order, pulls the quad pages
//! intersecting the AOI bounding box and reports progress as [`SearchEvent`]s
//! over a channel. The owner can cancel through a [`CancelHandle`]; the flag is
//! observed between pages, so an in-flight page fetch always completes first.

use crate::traits::QuadIndex;
use crate::{Aoi, BoundingBox, Mosaic, Quad, QuadSearchError, SearchResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub enum SearchEvent {
    /// A mosaic is about to be searched. `index` is 1-based.
    MosaicStarted { index: usize, name: String },
    /// Page counter for the current mosaic, starting at 1 before the first fetch.
    PageRead { page: usize },
    Finished(SearchResult),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(SearchResult),
    /// Quads accumulated before the cancel flag was observed, one list per
    /// mosaic. Never reported as an event.
    Canceled { partial: Vec<Vec<Quad>> },
}

/// One-shot cancellation flag shared between a session and its owner.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

pub struct SearchSession {
    id: Uuid,
    events: UnboundedReceiver<SearchEvent>,
    cancel: CancelHandle,
    task: JoinHandle<Result<Outcome, QuadSearchError>>,
}

impl SearchSession {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Next progress event, `None` once the worker has stopped and the queue is drained.
    pub async fn next_event(&mut self) -> Option<SearchEvent> {
        self.events.recv().await
    }

    pub async fn join(self) -> Result<Outcome, QuadSearchError> {
        self.task
            .await
            .map_err(|error| QuadSearchError::Task(error.to_string()))?
    }
}

struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct QuadFinder<I> {
    index: Arc<I>,
    active: Arc<AtomicBool>,
}

impl<I> QuadFinder<I>
where
    I: QuadIndex + 'static,
{
    pub fn new(index: Arc<I>) -> Self {
        Self {
            index,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Spawns a search over `mosaics` on the tokio runtime.
    pub fn start(&self, mosaics: Vec<Mosaic>, aoi: &Aoi) -> Result<SearchSession, QuadSearchError> {
        if mosaics.is_empty() {
            return Err(QuadSearchError::NoMosaics);
        }
        if self.active.swap(true, Ordering::AcqRel) {
            return Err(QuadSearchError::SearchInProgress);
        }
        let guard = ActiveGuard(self.active.clone());

        let id = Uuid::new_v4();
        let bbox = aoi.bounding_box();
        let cancel = CancelHandle::new();
        let (sender, events) = mpsc::unbounded_channel();

        let index = self.index.clone();
        let worker_cancel = cancel.clone();
        let span = info_span!("quad_search", session = %id, mosaics = mosaics.len());
        let task = tokio::spawn(
            async move {
                let _guard = guard;
                find_quads(index.as_ref(), &mosaics, bbox, &worker_cancel, &sender).await
            }
            .instrument(span),
        );

        Ok(SearchSession {
            id,
            events,
            cancel,
            task,
        })
    }
}

/// Runs the sequential fetch loop, emitting progress on `events`.
pub async fn find_quads<I>(
    index: &I,
    mosaics: &[Mosaic],
    bbox: BoundingBox,
    cancel: &CancelHandle,
    events: &UnboundedSender<SearchEvent>,
) -> Result<Outcome, QuadSearchError>
where
    I: QuadIndex + ?Sized,
{
    let mut all_quads: Vec<Vec<Quad>> = vec![Vec::new(); mosaics.len()];

    for (position, mosaic) in mosaics.iter().enumerate() {
        if cancel.is_canceled() {
            warn!(mosaic = %mosaic.name, "quad search canceled");
            return Ok(Outcome::Canceled { partial: all_quads });
        }

        info!(index = position + 1, mosaic = %mosaic.name, "searching mosaic");
        emit(
            events,
            SearchEvent::MosaicStarted {
                index: position + 1,
                name: mosaic.name.clone(),
            },
        );
        emit(events, SearchEvent::PageRead { page: 1 });

        match fetch_mosaic(index, mosaic, &bbox, cancel, events, &mut all_quads[position]).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(
                    mosaic = %mosaic.name,
                    quads = all_quads[position].len(),
                    "quad search canceled"
                );
                return Ok(Outcome::Canceled { partial: all_quads });
            }
            Err(error) => {
                warn!(mosaic = %mosaic.name, error = %error, "quad search failed");
                emit(events, SearchEvent::Failed(error.to_string()));
                return Err(error);
            }
        }
    }

    let result = SearchResult { quads: all_quads };
    info!(total_quads = result.total_quads(), "quad search finished");
    emit(events, SearchEvent::Finished(result.clone()));
    Ok(Outcome::Completed(result))
}

/// Returns `Ok(false)` when the cancel flag was observed after a page.
async fn fetch_mosaic<I>(
    index: &I,
    mosaic: &Mosaic,
    bbox: &BoundingBox,
    cancel: &CancelHandle,
    events: &UnboundedSender<SearchEvent>,
    quads: &mut Vec<Quad>,
) -> Result<bool, QuadSearchError>
where
    I: QuadIndex + ?Sized,
{
    let mut pager = index.quads_for_mosaic(mosaic, bbox).await?;
    let mut page_index = 0usize;

    while let Some(page) = pager.next_page().await? {
        debug!(page = page_index + 1, quads = page.len(), "quad page read");
        quads.extend(page);
        emit(events, SearchEvent::PageRead { page: page_index + 2 });
        page_index += 1;

        if cancel.is_canceled() {
            return Ok(false);
        }
    }

    Ok(true)
}

// Receivers may be gone; the search keeps going regardless.
fn emit(events: &UnboundedSender<SearchEvent>, event: SearchEvent) {
    let _ = events.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::QuadPager;
    use async_trait::async_trait;
    use geo::polygon;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    fn quad(id: String) -> Quad {
        Quad {
            id,
            bbox: BoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap(),
            percent_covered: Some(100.0),
            links: HashMap::new(),
        }
    }

    fn page(prefix: &str, count: usize) -> Vec<Quad> {
        (0..count).map(|n| quad(format!("{prefix}-{n}"))).collect()
    }

    fn mosaic(id: &str) -> Mosaic {
        Mosaic {
            id: id.to_string(),
            name: format!("{id}_mosaic"),
            bbox: BoundingBox::new(-10.0, -10.0, 10.0, 10.0).unwrap(),
            first_acquired: None,
            last_acquired: None,
            datatype: None,
            product_type: None,
            quad_size: None,
            level: None,
            links: HashMap::new(),
        }
    }

    fn aoi() -> Aoi {
        Aoi::new(polygon![
            (x: 1.0, y: 1.0),
            (x: 2.0, y: 1.0),
            (x: 2.0, y: 2.0),
            (x: 1.0, y: 2.0),
            (x: 1.0, y: 1.0),
        ])
        .unwrap()
    }

    /// Serves fixed pages per mosaic id. Optionally cancels, fails or blocks
    /// when a given page (mosaic id, 0-based page) is served.
    #[derive(Default)]
    struct FakeIndex {
        pages: HashMap<String, Vec<Vec<Quad>>>,
        cancel_at: Option<(String, usize, CancelHandle)>,
        fail_at: Option<(String, usize)>,
        gate: Option<Arc<Notify>>,
        fetches: Arc<AtomicUsize>,
        bboxes: Arc<Mutex<Vec<BoundingBox>>>,
    }

    impl FakeIndex {
        fn standard() -> Self {
            let mut pages = HashMap::new();
            pages.insert("a".to_string(), vec![page("a1", 3), page("a2", 3)]);
            pages.insert("b".to_string(), vec![page("b1", 5)]);
            Self {
                pages,
                ..Self::default()
            }
        }
    }

    struct FakePager {
        mosaic_id: String,
        pages: Vec<Vec<Quad>>,
        position: usize,
        cancel_at: Option<(usize, CancelHandle)>,
        fail_at: Option<usize>,
        gate: Option<Arc<Notify>>,
        fetches: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl QuadPager for FakePager {
        async fn next_page(&mut self) -> Result<Option<Vec<Quad>>, QuadSearchError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.position >= self.pages.len() {
                return Ok(None);
            }
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_at == Some(self.position) {
                return Err(QuadSearchError::Unauthorized(format!(
                    "token expired for {}",
                    self.mosaic_id
                )));
            }
            if let Some((at, handle)) = &self.cancel_at {
                if *at == self.position {
                    handle.cancel();
                }
            }
            let page = self.pages[self.position].clone();
            self.position += 1;
            Ok(Some(page))
        }
    }

    #[async_trait]
    impl QuadIndex for FakeIndex {
        async fn quads_for_mosaic(
            &self,
            mosaic: &Mosaic,
            bbox: &BoundingBox,
        ) -> Result<Box<dyn QuadPager>, QuadSearchError> {
            self.bboxes.lock().unwrap().push(*bbox);
            Ok(Box::new(FakePager {
                mosaic_id: mosaic.id.clone(),
                pages: self.pages.get(&mosaic.id).cloned().unwrap_or_default(),
                position: 0,
                cancel_at: self
                    .cancel_at
                    .as_ref()
                    .filter(|(id, _, _)| *id == mosaic.id)
                    .map(|(_, page, handle)| (*page, handle.clone())),
                fail_at: self
                    .fail_at
                    .as_ref()
                    .filter(|(id, _)| *id == mosaic.id)
                    .map(|(_, page)| *page),
                gate: self.gate.clone(),
                fetches: self.fetches.clone(),
            }))
        }

        async fn one_quad(&self, mosaic: &Mosaic) -> Result<Option<Quad>, QuadSearchError> {
            Ok(self
                .pages
                .get(&mosaic.id)
                .and_then(|pages| pages.first())
                .and_then(|page| page.first())
                .cloned())
        }
    }

    async fn run(
        index: &FakeIndex,
        mosaics: &[Mosaic],
        cancel: &CancelHandle,
    ) -> (Result<Outcome, QuadSearchError>, Vec<SearchEvent>) {
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let outcome = find_quads(index, mosaics, aoi().bounding_box(), cancel, &sender).await;
        drop(sender);
        let mut events = Vec::new();
        while let Some(event) = receiver.recv().await {
            events.push(event);
        }
        (outcome, events)
    }

    fn finished_count(events: &[SearchEvent]) -> usize {
        events
            .iter()
            .filter(|event| matches!(event, SearchEvent::Finished(_)))
            .count()
    }

    fn started_indices(events: &[SearchEvent]) -> Vec<usize> {
        events
            .iter()
            .filter_map(|event| match event {
                SearchEvent::MosaicStarted { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn completed_search_groups_quads_per_mosaic_in_input_order() {
        let index = FakeIndex::standard();
        let mosaics = vec![mosaic("a"), mosaic("b")];

        let (outcome, events) = run(&index, &mosaics, &CancelHandle::new()).await;

        let Outcome::Completed(result) = outcome.unwrap() else {
            panic!("search should complete");
        };
        assert_eq!(result.quads.len(), 2);
        assert_eq!(result.quads[0].len(), 6);
        assert_eq!(result.quads[1].len(), 5);
        assert_eq!(result.total_quads(), 11);
        assert_eq!(result.quads[0][0].id, "a1-0");
        assert_eq!(result.quads[0][3].id, "a2-0");

        assert_eq!(
            events,
            vec![
                SearchEvent::MosaicStarted {
                    index: 1,
                    name: "a_mosaic".to_string()
                },
                SearchEvent::PageRead { page: 1 },
                SearchEvent::PageRead { page: 2 },
                SearchEvent::PageRead { page: 3 },
                SearchEvent::MosaicStarted {
                    index: 2,
                    name: "b_mosaic".to_string()
                },
                SearchEvent::PageRead { page: 1 },
                SearchEvent::PageRead { page: 2 },
                SearchEvent::Finished(result.clone()),
            ]
        );
    }

    #[tokio::test]
    async fn every_mosaic_is_queried_with_the_aoi_bbox() {
        let index = FakeIndex::standard();
        let mosaics = vec![mosaic("a"), mosaic("b")];

        let _ = run(&index, &mosaics, &CancelHandle::new()).await;

        let bboxes = index.bboxes.lock().unwrap().clone();
        assert_eq!(bboxes, vec![aoi().bounding_box(); 2]);
    }

    #[tokio::test]
    async fn repeated_runs_produce_identical_results() {
        let index = FakeIndex::standard();
        let mosaics = vec![mosaic("a"), mosaic("b")];

        let (first, _) = run(&index, &mosaics, &CancelHandle::new()).await;
        let (second, _) = run(&index, &mosaics, &CancelHandle::new()).await;

        assert_eq!(first.unwrap(), second.unwrap());
    }

    #[tokio::test]
    async fn mosaic_without_quads_still_gets_an_entry() {
        let index = FakeIndex::standard();
        let mosaics = vec![mosaic("empty"), mosaic("b")];

        let (outcome, events) = run(&index, &mosaics, &CancelHandle::new()).await;

        let Outcome::Completed(result) = outcome.unwrap() else {
            panic!("search should complete");
        };
        assert_eq!(result.quads[0].len(), 0);
        assert_eq!(result.quads[1].len(), 5);
        assert_eq!(started_indices(&events), vec![1, 2]);
    }

    #[tokio::test]
    async fn cancel_before_start_reads_nothing() {
        let index = FakeIndex::standard();
        let mosaics = vec![mosaic("a"), mosaic("b")];
        let cancel = CancelHandle::new();
        cancel.cancel();

        let (outcome, events) = run(&index, &mosaics, &cancel).await;

        assert_eq!(
            outcome.unwrap(),
            Outcome::Canceled {
                partial: vec![Vec::new(), Vec::new()]
            }
        );
        assert!(events.is_empty());
        assert_eq!(index.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_mid_mosaic_keeps_pages_read_and_suppresses_completion() {
        let cancel = CancelHandle::new();
        let mut index = FakeIndex::standard();
        index
            .pages
            .insert("b".to_string(), vec![page("b1", 5), page("b2", 4), page("b3", 2)]);
        index.cancel_at = Some(("b".to_string(), 1, cancel.clone()));
        let mosaics = vec![mosaic("a"), mosaic("b"), mosaic("c")];

        let (outcome, events) = run(&index, &mosaics, &cancel).await;

        let Outcome::Canceled { partial } = outcome.unwrap() else {
            panic!("search should be canceled");
        };
        assert_eq!(partial[0].len(), 6);
        assert_eq!(partial[1].len(), 9);
        assert!(partial[2].is_empty());
        assert_eq!(finished_count(&events), 0);
        assert_eq!(started_indices(&events), vec![1, 2]);
        assert_eq!(events.last(), Some(&SearchEvent::PageRead { page: 3 }));
        assert_eq!(index.fetches.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn page_counter_resets_per_mosaic() {
        let index = FakeIndex::standard();
        let mosaics = vec![mosaic("a"), mosaic("b")];

        let (_, events) = run(&index, &mosaics, &CancelHandle::new()).await;

        let mut counters: Vec<Vec<usize>> = Vec::new();
        for event in &events {
            match event {
                SearchEvent::MosaicStarted { .. } => counters.push(Vec::new()),
                SearchEvent::PageRead { page } => counters.last_mut().unwrap().push(*page),
                _ => {}
            }
        }
        assert_eq!(counters, vec![vec![1, 2, 3], vec![1, 2]]);
    }

    #[tokio::test]
    async fn remote_failure_aborts_and_reports() {
        let mut index = FakeIndex::standard();
        index.fail_at = Some(("a".to_string(), 1));
        let mosaics = vec![mosaic("a"), mosaic("b")];

        let (outcome, events) = run(&index, &mosaics, &CancelHandle::new()).await;

        assert!(matches!(outcome, Err(QuadSearchError::Unauthorized(_))));
        assert_eq!(finished_count(&events), 0);
        assert!(matches!(events.last(), Some(SearchEvent::Failed(_))));
        assert_eq!(started_indices(&events), vec![1]);
    }

    #[tokio::test]
    async fn finder_rejects_empty_selection() {
        let finder = QuadFinder::new(Arc::new(FakeIndex::standard()));
        let result = finder.start(Vec::new(), &aoi());
        assert!(matches!(result, Err(QuadSearchError::NoMosaics)));
        assert!(!finder.is_running());
    }

    #[tokio::test]
    async fn finder_session_streams_events_and_completes() {
        let finder = QuadFinder::new(Arc::new(FakeIndex::standard()));
        let mut session = finder.start(vec![mosaic("a"), mosaic("b")], &aoi()).unwrap();

        let mut events = Vec::new();
        while let Some(event) = session.next_event().await {
            events.push(event);
        }

        let outcome = session.join().await.unwrap();
        assert!(matches!(outcome, Outcome::Completed(ref result) if result.total_quads() == 11));
        assert_eq!(finished_count(&events), 1);
        assert!(!finder.is_running());
    }

    #[tokio::test]
    async fn finder_allows_one_session_at_a_time() {
        let gate = Arc::new(Notify::new());
        let index = FakeIndex {
            gate: Some(gate.clone()),
            ..FakeIndex::standard()
        };
        let finder = QuadFinder::new(Arc::new(index));

        let session = finder.start(vec![mosaic("a")], &aoi()).unwrap();
        assert!(finder.is_running());
        assert!(matches!(
            finder.start(vec![mosaic("b")], &aoi()),
            Err(QuadSearchError::SearchInProgress)
        ));

        session.cancel();
        gate.notify_one();
        let outcome = session.join().await.unwrap();
        assert!(matches!(outcome, Outcome::Canceled { .. }));
        assert!(!finder.is_running());

        let mut index = FakeIndex::standard();
        index.pages.insert("b".to_string(), vec![page("b1", 1)]);
        let finder = QuadFinder::new(Arc::new(index));
        let session = finder.start(vec![mosaic("b")], &aoi()).unwrap();
        assert!(matches!(session.join().await.unwrap(), Outcome::Completed(_)));
    }

    #[tokio::test]
    async fn cancel_is_observed_after_the_in_flight_page() {
        let gate = Arc::new(Notify::new());
        let index = FakeIndex {
            gate: Some(gate.clone()),
            ..FakeIndex::standard()
        };
        let fetches = index.fetches.clone();
        let finder = QuadFinder::new(Arc::new(index));
        let mut session = finder.start(vec![mosaic("a"), mosaic("b")], &aoi()).unwrap();

        assert!(matches!(
            session.next_event().await,
            Some(SearchEvent::MosaicStarted { index: 1, .. })
        ));
        assert_eq!(session.next_event().await, Some(SearchEvent::PageRead { page: 1 }));

        session.cancel();
        gate.notify_one();

        let mut events = Vec::new();
        while let Some(event) = session.next_event().await {
            events.push(event);
        }
        let Outcome::Canceled { partial } = session.join().await.unwrap() else {
            panic!("search should be canceled");
        };

        assert_eq!(events, vec![SearchEvent::PageRead { page: 2 }]);
        assert_eq!(partial[0].len(), 3);
        assert!(partial[1].is_empty());
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dropped_event_consumer_does_not_stop_the_search() {
        let finder = QuadFinder::new(Arc::new(FakeIndex::standard()));
        let session = finder.start(vec![mosaic("a"), mosaic("b")], &aoi()).unwrap();

        let outcome = session.join().await.unwrap();
        assert!(matches!(outcome, Outcome::Completed(ref result) if result.quads.len() == 2));
    }
}
