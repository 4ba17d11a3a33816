//! Load state machine bound to one on-screen image slot.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::domain::entities::{CacheKey, CacheMode, LoadState, LoadedImage, LogicalSize, RequestId};
use crate::domain::errors::ImageResult;
use crate::infrastructure::image::ImagePipeline;

#[derive(Debug, Clone, PartialEq, Eq)]
struct SlotTarget {
    url: String,
    key: CacheKey,
    mode: CacheMode,
}

#[derive(Default)]
struct SlotRequest {
    target: Option<SlotTarget>,
    task: Option<JoinHandle<()>>,
    reclaimed: bool,
}

impl SlotRequest {
    fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct SlotInner {
    pipeline: Arc<ImagePipeline>,
    state: watch::Sender<LoadState>,
    request: Mutex<SlotRequest>,
}

impl Drop for SlotInner {
    fn drop(&mut self) {
        self.request.get_mut().cancel();
    }
}

/// One logical image slot.
///
/// The slot publishes its `LoadState` on a watch channel. Only the most
/// recent request may change that state: a newer `load` aborts the previous
/// task, and any result that still arrives for an older request is dropped.
///
/// Clones share the same slot. Dropping the last clone cancels its work.
#[derive(Clone)]
pub struct ImageSlot {
    inner: Arc<SlotInner>,
}

impl std::fmt::Debug for ImageSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageSlot")
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl ImageSlot {
    /// Creates an idle slot.
    #[must_use]
    pub fn new(pipeline: Arc<ImagePipeline>) -> Self {
        let (state, _) = watch::channel(LoadState::Idle);
        Self {
            inner: Arc::new(SlotInner {
                pipeline,
                state,
                request: Mutex::new(SlotRequest::default()),
            }),
        }
    }

    /// Requests `url` at `size` points.
    ///
    /// A memory tier hit moves the slot to `Loaded` before returning. On a miss
    /// the slot moves to `Loading` and a background task fetches and decodes.
    /// Repeating the current request is a no-op unless the slot is idle; a
    /// failed request is re-run only through [`ImageSlot::retry`].
    ///
    /// Must be called within a Tokio runtime.
    pub fn load(&self, url: &str, size: LogicalSize, mode: CacheMode) {
        let key = self.inner.pipeline.resolve_cache_key(url, size);
        let target = SlotTarget {
            url: url.to_string(),
            key,
            mode,
        };

        let mut request = self.inner.request.lock();
        if request.target.as_ref() == Some(&target) && !self.inner.state.borrow().is_idle() {
            trace!(key = %target.key, "Slot already showing or loading this request");
            return;
        }

        request.cancel();
        request.reclaimed = false;
        request.target = Some(target);
        self.start(&mut request);
    }

    /// Re-runs the current request if the slot failed. Returns true if a new
    /// attempt started.
    pub fn retry(&self) -> bool {
        let mut request = self.inner.request.lock();
        if request.target.is_none() || !self.inner.state.borrow().is_failed() {
            return false;
        }
        request.cancel();
        self.start(&mut request);
        true
    }

    /// Cancels any in-flight work, forgets the request and returns to `Idle`.
    pub fn clear(&self) {
        let mut request = self.inner.request.lock();
        request.cancel();
        request.target = None;
        request.reclaimed = false;
        self.inner.state.send_replace(LoadState::Idle);
    }

    /// Drops the slot's bitmap while keeping the request, so that
    /// [`ImageSlot::restore`] can bring it back. The memory tier entry is left
    /// alone. Returns true if a bitmap was released.
    pub fn reclaim(&self) -> bool {
        let mut request = self.inner.request.lock();
        if !self.inner.state.borrow().is_loaded() {
            return false;
        }
        request.reclaimed = true;
        self.inner.state.send_replace(LoadState::Idle);
        if let Some(target) = &request.target {
            debug!(key = %target.key, "Reclaimed slot bitmap");
        }
        true
    }

    /// Re-runs a reclaimed request. Usually a memory tier hit, so the slot is
    /// `Loaded` again before this returns. Returns true if the slot had been
    /// reclaimed.
    ///
    /// Must be called within a Tokio runtime.
    pub fn restore(&self) -> bool {
        let mut request = self.inner.request.lock();
        if !request.reclaimed || request.target.is_none() {
            return false;
        }
        request.reclaimed = false;
        self.start(&mut request);
        true
    }

    /// Returns true if the bitmap was released by [`ImageSlot::reclaim`] and not
    /// yet restored.
    #[must_use]
    pub fn is_reclaimed(&self) -> bool {
        self.inner.request.lock().reclaimed
    }

    /// Returns the key of the current request.
    #[must_use]
    pub fn current_key(&self) -> Option<CacheKey> {
        self.inner
            .request
            .lock()
            .target
            .as_ref()
            .map(|target| target.key.clone())
    }

    /// Returns a snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> LoadState {
        self.inner.state.borrow().clone()
    }

    /// Subscribes to state changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<LoadState> {
        self.inner.state.subscribe()
    }

    /// Returns true if both handles refer to the same slot.
    #[must_use]
    pub fn same_slot(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn start(&self, request: &mut SlotRequest) {
        let Some(target) = request.target.clone() else {
            return;
        };

        if let Some(image) = self.inner.pipeline.cached(&target.key) {
            self.inner.state.send_replace(LoadState::Loaded(image));
            return;
        }

        let id = RequestId::next();
        self.inner.state.send_replace(LoadState::Loading(id));
        trace!(key = %target.key, request = %id, "Slot load started");

        let pipeline = self.inner.pipeline.clone();
        let slot = Arc::downgrade(&self.inner);
        request.task = Some(tokio::spawn(run_load(pipeline, slot, target, id)));
    }
}

async fn run_load(
    pipeline: Arc<ImagePipeline>,
    slot: Weak<SlotInner>,
    target: SlotTarget,
    id: RequestId,
) {
    let result = pipeline.load(&target.key, &target.url, target.mode).await;
    if let Err(e) = &result {
        let kind = if e.is_network_error() {
            "network"
        } else if e.is_decode_error() {
            "payload"
        } else {
            "other"
        };
        debug!(key = %target.key, request = %id, kind, error = %e, "Slot load failed");
    }
    if let Some(inner) = slot.upgrade() {
        apply_result(&inner.state, id, result);
    }
}

/// Publishes the outcome of request `id` if it is still the one in flight.
/// Returns false for superseded requests.
fn apply_result(
    state: &watch::Sender<LoadState>,
    id: RequestId,
    result: ImageResult<LoadedImage>,
) -> bool {
    let applied = state.send_if_modified(|current| {
        if current.request_id() != Some(id) {
            return false;
        }
        *current = match result {
            Ok(loaded) => LoadState::Loaded(loaded.image),
            Err(_) => LoadState::Failed,
        };
        true
    });
    if !applied {
        trace!(request = %id, "Discarded superseded load result");
    }
    applied
}
