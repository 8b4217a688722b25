//! End-to-end attribution scenarios against a scripted stack walker.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use allocpath::{
    AllocationPathManager, AllocationPathStorage, CallStackSource, GlobalPathStorage,
    InstrumentError, InstrumentationProvider, PathTrackError, TrackerConfig,
};

/// Walker returning a canned frame list, innermost first, and counting
/// invocations.
#[derive(Default)]
struct ScriptedWalker {
    frames: Mutex<Vec<String>>,
    walks: AtomicUsize,
}

#[derive(Clone, Default)]
struct WalkerHandle(Arc<ScriptedWalker>);

impl WalkerHandle {
    fn set_frames(&self, frames: &[&str]) {
        *self.0.frames.lock().unwrap() = frames.iter().map(|s| s.to_string()).collect();
    }

    fn walks(&self) -> usize {
        self.0.walks.load(Ordering::Relaxed)
    }
}

impl CallStackSource for WalkerHandle {
    fn collect_frames(&self, skip_frames: usize, max_frames: usize) -> Vec<String> {
        self.0.walks.fetch_add(1, Ordering::Relaxed);
        self.0
            .frames
            .lock()
            .unwrap()
            .iter()
            .skip(skip_frames)
            .take(max_frames)
            .cloned()
            .collect()
    }
}

#[derive(Clone, Default)]
struct RequestLog(Arc<Mutex<Vec<String>>>);

impl RequestLog {
    fn requests(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

impl InstrumentationProvider for RequestLog {
    fn request(&self, call_point: &allocpath::CallPoint) -> Result<(), InstrumentError> {
        self.0.lock().unwrap().push(call_point.name().to_string());
        Ok(())
    }
}

/// Provider that refuses one specific call site.
struct RefuseOne(&'static str);

impl InstrumentationProvider for RefuseOne {
    fn request(&self, call_point: &allocpath::CallPoint) -> Result<(), InstrumentError> {
        if &**call_point.name() == self.0 {
            Err(format!("cannot rewrite {}", self.0).into())
        } else {
            Ok(())
        }
    }
}

fn scripted_manager(frames: &[&str]) -> (AllocationPathManager, WalkerHandle, RequestLog) {
    let walker = WalkerHandle::default();
    walker.set_frames(frames);
    let provider = RequestLog::default();
    let manager = AllocationPathManager::with_parts(
        &TrackerConfig::new(),
        Box::new(provider.clone()),
        Box::new(walker.clone()),
    );
    (manager, walker, provider)
}

fn names_of(path: &allocpath::AllocationPath) -> Vec<String> {
    path.names().iter().map(|n| n.to_string()).collect()
}

#[test]
fn five_deep_chain_keeps_innermost_four() {
    // main -> a -> b -> c -> d -> allocate, walker reports innermost first.
    let (manager, _, provider) = scripted_manager(&["d", "c", "b", "a", "main"]);
    let storage = GlobalPathStorage::new();

    manager.on_allocate(&storage, 0x1000, 0).unwrap();

    // Only the innermost four sites get registered and instrumented.
    assert_eq!(manager.registry().len(), 4);
    assert_eq!(provider.requests().len(), 4);
    assert!(!provider.requests().contains(&"main".to_string()));

    let path = manager.lookup(&storage, 0x1000).expect("path recorded");
    assert_eq!(names_of(&path), ["d", "c", "b", "a"]);
    assert_eq!(path.to_string(), "a -> b -> c -> d");

    manager.on_free(&storage, 0x1000);
    assert!(manager.lookup(&storage, 0x1000).is_none());
    assert!(storage.is_empty());
}

#[test]
fn identical_chains_decode_identically() {
    let (manager, _, _) = scripted_manager(&["inner", "outer"]);
    let storage = GlobalPathStorage::new();

    let first = manager.on_allocate(&storage, 0x2000, 0).unwrap();
    let second = manager.on_allocate(&storage, 0x3000, 0).unwrap();

    assert_eq!(first, second);
    let first_path = manager.lookup(&storage, 0x2000).unwrap();
    let second_path = manager.lookup(&storage, 0x3000).unwrap();
    assert_eq!(names_of(&first_path), names_of(&second_path));
}

#[test]
fn shallow_chain_is_cached_as_premature() {
    let (manager, walker, _) = scripted_manager(&["leaf", "root"]);
    let storage = GlobalPathStorage::new();

    // First allocation from an idle thread walks the stack.
    let key = manager.on_allocate(&storage, 0x4000, 0).unwrap();
    assert_eq!(walker.walks(), 1);

    // The same shallow chain, now live in the tracker via push/pop
    // instrumentation: root called first, then leaf.
    let root = manager.registry().find("root").unwrap().id();
    let leaf = manager.registry().find("leaf").unwrap().id();
    allocpath::tracker::push(root);
    allocpath::tracker::push(leaf);

    let cached_key = manager.on_allocate(&storage, 0x5000, 0).unwrap();

    allocpath::tracker::pop(leaf);
    allocpath::tracker::pop(root);

    assert_eq!(cached_key, key);
    // The premature cache answered; no re-walk happened.
    assert_eq!(walker.walks(), 1);
}

#[test]
fn ambiguous_partial_depth_rewalks() {
    let (manager, walker, _) = scripted_manager(&["d", "c", "b", "a"]);
    let storage = GlobalPathStorage::new();

    manager.on_allocate(&storage, 0x6000, 0).unwrap();
    assert_eq!(walker.walks(), 1);

    // Live depth 1 with a key the premature set never vouched for: the
    // chain could be deeper than instrumentation has revealed, so the
    // manager must re-walk.
    let a = manager.registry().find("a").unwrap().id();
    allocpath::tracker::push(a);
    manager.on_allocate(&storage, 0x7000, 0).unwrap();
    allocpath::tracker::pop(a);

    assert_eq!(walker.walks(), 2);
}

#[test]
fn full_depth_is_the_walk_free_fast_path() {
    let (manager, walker, _) = scripted_manager(&["d", "c", "b", "a"]);
    let storage = GlobalPathStorage::new();

    // One walk interns a..d and their ids.
    let walked_key = manager.on_allocate(&storage, 0x8000, 0).unwrap();
    assert_eq!(walker.walks(), 1);

    // A fully accumulated tracker key is definitive: stored as-is.
    for name in ["a", "b", "c", "d"] {
        allocpath::tracker::push(manager.registry().find(name).unwrap().id());
    }
    let fast_key = manager.on_allocate(&storage, 0x9000, 0).unwrap();
    for name in ["d", "c", "b", "a"] {
        allocpath::tracker::pop(manager.registry().find(name).unwrap().id());
    }

    assert_eq!(walker.walks(), 1);
    assert_eq!(fast_key, walked_key);
    assert_eq!(manager.stack_walk_count(), 1);
}

#[test]
fn returning_out_of_deep_nesting_keeps_the_fast_path_exact() {
    let (manager, walker, _) = scripted_manager(&[]);
    let storage = GlobalPathStorage::new();

    let ids: Vec<_> = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|name| manager.registry().intern(name).unwrap().id())
        .collect();

    // Nest five tracked calls, then return from the innermost one.
    for &id in &ids {
        allocpath::tracker::push(id);
    }
    allocpath::tracker::pop(ids[4]);

    let key = manager.on_allocate(&storage, 0x1100, 0).unwrap();

    for &id in ids[..4].iter().rev() {
        allocpath::tracker::pop(id);
    }

    // Depth == max is definitive: no walk, and the oldest of the four
    // live frames survived the excursion past the depth cap.
    assert_eq!(walker.walks(), 0);
    let path = manager.lookup(&storage, 0x1100).unwrap();
    assert_eq!(names_of(&path), ["d", "c", "b", "a"]);
    assert_eq!(path.key(), key);
}

#[test]
fn instrumentation_refusal_poisons_only_that_capture() {
    let walker = WalkerHandle::default();
    walker.set_frames(&["bad_site", "caller"]);
    let manager = AllocationPathManager::with_parts(
        &TrackerConfig::new(),
        Box::new(RefuseOne("bad_site")),
        Box::new(walker.clone()),
    );
    let storage = GlobalPathStorage::new();

    let err = manager.on_allocate(&storage, 0xA000, 0).unwrap_err();
    match err {
        PathTrackError::Instrumentation { call_point, .. } => {
            assert_eq!(&*call_point, "bad_site");
        }
        other => panic!("unexpected error: {other}"),
    }
    // The failed capture stored nothing.
    assert!(storage.get(0xA000).is_none());

    // An unrelated call chain keeps working.
    walker.set_frames(&["good_site", "caller"]);
    manager.on_allocate(&storage, 0xB000, 0).unwrap();
    assert!(manager.lookup(&storage, 0xB000).is_some());
}

#[test]
fn skip_frames_discards_engine_frames() {
    let (manager, _, _) = scripted_manager(&["engine_hook", "app_leaf", "app_root"]);
    let storage = GlobalPathStorage::new();

    manager.on_allocate(&storage, 0xC000, 1).unwrap();
    let path = manager.lookup(&storage, 0xC000).unwrap();
    let names = names_of(&path);
    assert_eq!(&names[..2], ["app_leaf", "app_root"]);
    assert!(manager.registry().find("engine_hook").is_none());
}

#[test]
fn unresolved_slots_render_the_sentinel() {
    let (manager, _, _) = scripted_manager(&["only_frame"]);
    let storage = GlobalPathStorage::new();

    manager.on_allocate(&storage, 0xD000, 0).unwrap();
    let path = manager.lookup(&storage, 0xD000).unwrap();
    let names = names_of(&path);
    assert_eq!(names[0], "only_frame");
    for name in &names[1..] {
        assert_eq!(name, allocpath::UNKNOWN_CALL_POINT);
    }
}

#[test]
fn freeing_twice_and_freeing_unknown_addresses_is_quiet() {
    let (manager, _, _) = scripted_manager(&["leaf"]);
    let storage = GlobalPathStorage::new();

    manager.on_free(&storage, 0xE000);
    manager.on_allocate(&storage, 0xE000, 0).unwrap();
    manager.on_free(&storage, 0xE000);
    manager.on_free(&storage, 0xE000);
    assert!(manager.lookup(&storage, 0xE000).is_none());
}

#[test]
fn capped_depth_config_shortens_captures() {
    let walker = WalkerHandle::default();
    walker.set_frames(&["w", "x", "y", "z"]);
    let manager = AllocationPathManager::with_parts(
        &TrackerConfig::new().max_depth(2),
        Box::new(RequestLog::default()),
        Box::new(walker),
    );
    let storage = GlobalPathStorage::new();

    manager.on_allocate(&storage, 0xF000, 0).unwrap();
    assert_eq!(manager.registry().len(), 2);
    let path = manager.lookup(&storage, 0xF000).unwrap();
    assert_eq!(&names_of(&path)[..2], ["w", "x"]);
}
