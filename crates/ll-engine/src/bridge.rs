use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::{Backend, BackendRuntime};
use crate::config::LoadParams;
use crate::handle::ModelHandle;

/// Opaque identifier handed to callers for a loaded model.
pub type HandleId = u64;

/// The identifier that never names a model.
pub const NULL_HANDLE: HandleId = 0;

type SharedHandle<B> = Arc<Mutex<ModelHandle<B>>>;

/// Registry of loaded models keyed by opaque identifiers.
///
/// Every operation reports failure as a sentinel (`NULL_HANDLE` or `None`)
/// and logs the cause. Identifiers are never reused, so a stale identifier
/// cannot reach a newer model.
pub struct Bridge<B: Backend> {
    runtime: Arc<BackendRuntime<B>>,
    params: LoadParams,
    handles: Mutex<HashMap<HandleId, SharedHandle<B>>>,
    next_id: AtomicU64,
}

impl<B: Backend> Bridge<B> {
    pub fn new(backend: B) -> Self {
        Self::with_params(backend, LoadParams::default())
    }

    pub fn with_params(backend: B, params: LoadParams) -> Self {
        Self {
            runtime: BackendRuntime::new(backend),
            params,
            handles: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Whether the linked backend can run models at all.
    pub fn is_real_backend(&self) -> bool {
        self.runtime.backend().is_real()
    }

    /// Number of models currently loaded.
    pub fn live_handles(&self) -> usize {
        self.lock_handles().len()
    }

    /// Load a model with the bridge's default parameters.
    pub fn load(&self, path: &str) -> HandleId {
        self.load_with(path, &self.params)
    }

    /// Load a model, returning `NULL_HANDLE` on any failure.
    pub fn load_with(&self, path: &str, params: &LoadParams) -> HandleId {
        if path.is_empty() {
            log::warn!("load: empty model path");
            return NULL_HANDLE;
        }
        if !self.is_real_backend() {
            log::warn!(
                "load: {} backend cannot run models, ignoring {}",
                self.runtime.backend().name(),
                path
            );
            return NULL_HANDLE;
        }

        match ModelHandle::load(&self.runtime, Path::new(path), params) {
            Ok(handle) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.lock_handles()
                    .insert(id, Arc::new(Mutex::new(handle)));
                log::info!("load: {} -> handle {}", path, id);
                id
            }
            Err(e) => {
                log::warn!("load: {}: {}", path, e);
                NULL_HANDLE
            }
        }
    }

    /// Run greedy completion on a loaded model.
    ///
    /// Returns `None` for an unknown handle, an empty prompt, or a failure
    /// before generation starts. A failure during generation still returns
    /// the text produced so far. Negative `max_tokens` is treated as zero.
    pub fn infer(&self, id: HandleId, prompt: &str, max_tokens: i64) -> Option<String> {
        if id == NULL_HANDLE {
            log::debug!("infer: null handle");
            return None;
        }
        if prompt.is_empty() {
            log::debug!("infer: empty prompt");
            return None;
        }

        let Some(handle) = self.lock_handles().get(&id).cloned() else {
            log::warn!("infer: unknown handle {}", id);
            return None;
        };
        let mut handle = handle.lock().unwrap_or_else(PoisonError::into_inner);

        let max_tokens = usize::try_from(max_tokens).unwrap_or(0);
        match handle.infer(prompt, max_tokens) {
            Ok(text) => Some(text),
            Err(e) => {
                log::warn!("infer: handle {}: {}", id, e);
                None
            }
        }
    }

    /// Release a model. Unknown identifiers, including ones already
    /// unloaded, are ignored.
    ///
    /// If an `infer` on the same handle is still running, its resources are
    /// released when that call returns.
    pub fn unload(&self, id: HandleId) {
        if id == NULL_HANDLE {
            return;
        }
        let removed = self.lock_handles().remove(&id);
        match removed {
            Some(handle) => {
                drop(handle);
                log::info!("unload: handle {}", id);
            }
            None => log::debug!("unload: unknown handle {}", id),
        }
    }

    fn lock_handles(&self) -> MutexGuard<'_, HashMap<HandleId, SharedHandle<B>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{model_file, MockBackend, MockEvent, MockScript, EOS};
    use crate::stub::StubBackend;
    use std::thread;

    fn path_of(file: &tempfile::NamedTempFile) -> String {
        file.path().to_str().unwrap().to_string()
    }

    #[test]
    fn test_scenario_null_inputs() {
        let bridge = Bridge::new(MockBackend::new());
        assert_eq!(bridge.load(""), NULL_HANDLE);
        assert_eq!(bridge.load("/nonexistent/path"), NULL_HANDLE);
        assert_eq!(bridge.infer(NULL_HANDLE, "hello", 10), None);
        bridge.unload(NULL_HANDLE);
        assert_eq!(bridge.live_handles(), 0);
    }

    #[test]
    fn test_load_infer_unload() {
        let file = model_file();
        let backend = MockBackend::new();
        let events = backend.events();
        let bridge = Bridge::new(backend);

        let id = bridge.load(&path_of(&file));
        assert_ne!(id, NULL_HANDLE);
        assert_eq!(bridge.infer(id, "hello", 10).as_deref(), Some(" world!"));
        assert_eq!(bridge.live_handles(), 1);

        bridge.unload(id);
        assert_eq!(bridge.live_handles(), 0);
        assert_eq!(events.count(MockEvent::BackendFree), 1);
        assert_eq!(bridge.infer(id, "hello", 10), None);
    }

    #[test]
    fn test_empty_prompt_with_valid_handle() {
        let file = model_file();
        let backend = MockBackend::new();
        let events = backend.events();
        let bridge = Bridge::new(backend);
        let id = bridge.load(&path_of(&file));

        assert_eq!(bridge.infer(id, "", 10), None);
        assert!(events.decodes().is_empty());
    }

    #[test]
    fn test_max_tokens_bounds_output() {
        let file = model_file();
        let script = MockScript::default().replies(vec![3, 4, 5, 4, 5]);
        let bridge = Bridge::new(MockBackend::new().with_script(script));
        let id = bridge.load(&path_of(&file));

        assert_eq!(bridge.infer(id, "hello", 2).as_deref(), Some("hello world"));
        assert_eq!(bridge.infer(id, "hello", 0).as_deref(), Some(""));
        assert_eq!(bridge.infer(id, "hello", -5).as_deref(), Some(""));
    }

    #[test]
    fn test_immediate_eos_returns_empty_text() {
        let file = model_file();
        let script = MockScript::default().replies(vec![EOS]);
        let bridge = Bridge::new(MockBackend::new().with_script(script));
        let id = bridge.load(&path_of(&file));
        assert_eq!(bridge.infer(id, "hello", 10).as_deref(), Some(""));
    }

    #[test]
    fn test_decode_failure_mid_generation_returns_partial() {
        let file = model_file();
        let script = MockScript::default()
            .replies(vec![3, 4, 5])
            .fail_decode_at(2);
        let bridge = Bridge::new(MockBackend::new().with_script(script));
        let id = bridge.load(&path_of(&file));
        assert_eq!(bridge.infer(id, "hello", 10).as_deref(), Some("hello"));
    }

    #[test]
    fn test_prime_failure_returns_none() {
        let file = model_file();
        let script = MockScript::default().fail_decode_at(0);
        let bridge = Bridge::new(MockBackend::new().with_script(script));
        let id = bridge.load(&path_of(&file));
        assert_eq!(bridge.infer(id, "hello", 10), None);
    }

    #[test]
    fn test_prompt_longer_than_context_returns_none() {
        let file = model_file();
        let params = LoadParams {
            n_ctx: 3,
            ..LoadParams::default()
        };
        let bridge = Bridge::with_params(MockBackend::new(), params);
        let id = bridge.load(&path_of(&file));
        assert_eq!(bridge.infer(id, "hello hello hello", 10), None);
        assert_eq!(bridge.infer(id, "hello", 10).as_deref(), Some(" world"));
    }

    #[test]
    fn test_model_load_failure() {
        let file = model_file();
        let backend = MockBackend::new().fail_open();
        let events = backend.events();
        let bridge = Bridge::new(backend);

        assert_eq!(bridge.load(&path_of(&file)), NULL_HANDLE);
        assert_eq!(
            events.lifecycle(),
            vec![MockEvent::BackendInit, MockEvent::BackendFree]
        );
    }

    #[test]
    fn test_double_unload_is_ignored() {
        let file = model_file();
        let backend = MockBackend::new();
        let events = backend.events();
        let bridge = Bridge::new(backend);
        let id = bridge.load(&path_of(&file));

        bridge.unload(id);
        bridge.unload(id);
        assert_eq!(events.count(MockEvent::ModelDrop), 1);
        assert_eq!(events.count(MockEvent::BackendFree), 1);
    }

    #[test]
    fn test_backend_shared_between_handles() {
        let file = model_file();
        let backend = MockBackend::new();
        let events = backend.events();
        let bridge = Bridge::new(backend);

        let a = bridge.load(&path_of(&file));
        let b = bridge.load(&path_of(&file));
        assert_ne!(a, b);
        assert_eq!(events.count(MockEvent::BackendInit), 1);

        bridge.unload(a);
        assert_eq!(events.count(MockEvent::BackendFree), 0);
        assert_eq!(bridge.infer(b, "hello", 10).as_deref(), Some(" world!"));

        bridge.unload(b);
        assert_eq!(events.count(MockEvent::BackendFree), 1);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let file = model_file();
        let bridge = Bridge::new(MockBackend::new());
        let a = bridge.load(&path_of(&file));
        bridge.unload(a);
        let b = bridge.load(&path_of(&file));
        assert!(b > a);
        assert_eq!(bridge.infer(a, "hello", 10), None);
    }

    #[test]
    fn test_concurrent_infer_on_one_handle() {
        let file = model_file();
        let bridge = Arc::new(Bridge::new(MockBackend::new()));
        let id = bridge.load(&path_of(&file));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let bridge = Arc::clone(&bridge);
                thread::spawn(move || bridge.infer(id, "hello", 10))
            })
            .collect();
        for worker in workers {
            assert_eq!(worker.join().unwrap().as_deref(), Some(" world!"));
        }
    }

    #[test]
    fn test_stub_backend_refuses_everything() {
        let file = model_file();
        let bridge = Bridge::new(StubBackend);
        assert!(!bridge.is_real_backend());
        let id = bridge.load(&path_of(&file));
        assert_eq!(id, NULL_HANDLE);
        assert_eq!(bridge.infer(1, "hello", 10), None);
        bridge.unload(1);
    }
}
