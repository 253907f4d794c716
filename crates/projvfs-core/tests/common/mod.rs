//! Mock collaborators for integration tests.
//!
//! `MockFilesystem` is a small in-memory vnode tree with per-node
//! attribute flags and injectable faults; `MockProviderClient` captures
//! every frame the registry sends and lets a test block until the
//! expected number arrives; `MockScope` counts listener installs.
//! Together they drive the hook core deterministically, with real
//! blocked threads where a scenario needs them.

// Not every test binary uses every helper.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::unistd::Pid;
use projvfs_core::interceptor::VnodeInterceptor;
use projvfs_core::locks::LockGroup;
use projvfs_core::registry::ProviderHandle;
use projvfs_core::vfs::{
    AuthVerdict, AuthorizationScope, Filesystem, ProcessTable, ProviderClient, VnodeAction,
    VnodeOperation,
};
use projvfs_core::HookParams;
use projvfs_wire::{FileFlags, KernelMessage};

/// Poll period short enough to keep blocked-thread tests fast.
pub const FAST_POLL: Duration = Duration::from_millis(25);

/// Generous bound for waiting on cross-thread effects.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// MockFilesystem
// =============================================================================

#[derive(Debug)]
struct NodeData {
    id: u64,
    path: String,
    parent: Option<MockVnode>,
    is_dir: bool,
    is_mount_root: bool,
    flags: Mutex<FileFlags>,
}

/// Use-counted handle to a mock vnode. Equality is node identity.
#[derive(Debug, Clone)]
pub struct MockVnode(Arc<NodeData>);

impl PartialEq for MockVnode {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl MockVnode {
    /// Absolute path of the node.
    pub fn path(&self) -> &str {
        &self.0.path
    }

    /// Number of live handles to this node, for use-count assertions.
    pub fn use_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

/// In-memory vnode tree rooted at `/`.
pub struct MockFilesystem {
    nodes: Mutex<HashMap<String, MockVnode>>,
    next_id: AtomicU64,
    broken_attributes: Mutex<HashSet<String>>,
    broken_paths: Mutex<HashSet<String>>,
}

impl MockFilesystem {
    pub fn new() -> Arc<Self> {
        let fs = Self {
            nodes: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            broken_attributes: Mutex::new(HashSet::new()),
            broken_paths: Mutex::new(HashSet::new()),
        };
        let root = MockVnode(Arc::new(NodeData {
            id: 0,
            path: "/".to_string(),
            parent: None,
            is_dir: true,
            is_mount_root: true,
            flags: Mutex::new(FileFlags::empty()),
        }));
        fs.nodes.lock().unwrap().insert("/".to_string(), root);
        Arc::new(fs)
    }

    fn add_node(&self, path: &str, is_dir: bool, flags: FileFlags) -> MockVnode {
        let parent_path = match path.rfind('/') {
            Some(0) => "/",
            Some(idx) => &path[..idx],
            None => panic!("mock paths must be absolute: {path}"),
        };
        let parent = self.node(parent_path);
        let node = MockVnode(Arc::new(NodeData {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            path: path.to_string(),
            parent: Some(parent),
            is_dir,
            is_mount_root: false,
            flags: Mutex::new(flags),
        }));
        self.nodes
            .lock()
            .unwrap()
            .insert(path.to_string(), node.clone());
        node
    }

    /// Adds a directory; its parent must already exist.
    pub fn add_dir(&self, path: &str, flags: FileFlags) -> MockVnode {
        self.add_node(path, true, flags)
    }

    /// Adds a file; its parent must already exist.
    pub fn add_file(&self, path: &str, flags: FileFlags) -> MockVnode {
        self.add_node(path, false, flags)
    }

    /// Handle to an existing node.
    pub fn node(&self, path: &str) -> MockVnode {
        self.nodes
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_else(|| panic!("no mock node at {path}"))
    }

    /// Replaces a node's attribute flags.
    pub fn set_flags(&self, path: &str, flags: FileFlags) {
        *self.node(path).0.flags.lock().unwrap() = flags;
    }

    /// Makes attribute reads fail for `path`.
    pub fn break_attributes(&self, path: &str) {
        self.broken_attributes
            .lock()
            .unwrap()
            .insert(path.to_string());
    }

    /// Makes vnode-to-path resolution fail for `path`.
    pub fn break_path_resolution(&self, path: &str) {
        self.broken_paths.lock().unwrap().insert(path.to_string());
    }
}

impl Filesystem for MockFilesystem {
    type Vnode = MockVnode;

    fn lookup(&self, path: &str) -> Result<MockVnode, Errno> {
        self.nodes
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or(Errno::ENOENT)
    }

    fn parent(&self, vnode: &MockVnode) -> Option<MockVnode> {
        vnode.0.parent.clone()
    }

    fn is_directory(&self, vnode: &MockVnode) -> bool {
        vnode.0.is_dir
    }

    fn is_mount_root(&self, vnode: &MockVnode) -> bool {
        vnode.0.is_mount_root
    }

    fn attribute_flags(&self, vnode: &MockVnode) -> Result<FileFlags, Errno> {
        if self.broken_attributes.lock().unwrap().contains(&vnode.0.path) {
            return Err(Errno::ENOTSUP);
        }
        Ok(*vnode.0.flags.lock().unwrap())
    }

    fn vnode_path(&self, vnode: &MockVnode) -> Result<String, Errno> {
        if self.broken_paths.lock().unwrap().contains(&vnode.0.path) {
            return Err(Errno::EIO);
        }
        Ok(vnode.0.path.clone())
    }
}

// =============================================================================
// MockProcessTable
// =============================================================================

/// Pid-to-name table the tests populate directly.
#[derive(Default)]
pub struct MockProcessTable {
    names: Mutex<HashMap<i32, String>>,
}

impl MockProcessTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, pid: i32, name: &str) {
        self.names.lock().unwrap().insert(pid, name.to_string());
    }
}

impl ProcessTable for MockProcessTable {
    fn name_of(&self, pid: Pid) -> Option<String> {
        self.names.lock().unwrap().get(&pid.as_raw()).cloned()
    }
}

// =============================================================================
// MockProviderClient
// =============================================================================

/// Captures every frame sent to a provider, decoded for assertions.
pub struct MockProviderClient {
    sent: Mutex<Vec<KernelMessage>>,
    arrived: Condvar,
    fail_sends: AtomicBool,
}

impl MockProviderClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            arrived: Condvar::new(),
            fail_sends: AtomicBool::new(false),
        })
    }

    /// Makes subsequent sends fail with `EIO`.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    /// Everything sent so far.
    pub fn sent(&self) -> Vec<KernelMessage> {
        self.sent.lock().unwrap().clone()
    }

    /// Blocks until at least `count` frames have arrived and returns
    /// them. Panics after [`TEST_TIMEOUT`].
    pub fn wait_for_messages(&self, count: usize) -> Vec<KernelMessage> {
        let deadline = Instant::now() + TEST_TIMEOUT;
        let mut sent = self.sent.lock().unwrap();
        while sent.len() < count {
            let now = Instant::now();
            assert!(
                now < deadline,
                "timed out waiting for {count} provider messages (have {})",
                sent.len()
            );
            let (guard, _) = self
                .arrived
                .wait_timeout(sent, deadline - now)
                .unwrap();
            sent = guard;
        }
        sent.clone()
    }
}

impl ProviderClient for MockProviderClient {
    fn send(&self, message: &[u8]) -> Result<(), Errno> {
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(Errno::EIO);
        }
        let decoded = KernelMessage::decode(message).map_err(|_| Errno::EINVAL)?;
        self.sent.lock().unwrap().push(decoded);
        self.arrived.notify_all();
        Ok(())
    }
}

// =============================================================================
// MockScope
// =============================================================================

/// Authorization scope that counts installed listeners.
#[derive(Default)]
pub struct MockScope {
    active: AtomicUsize,
    fail_listen: AtomicBool,
}

/// Registration token; holds the interceptor the way a real scope
/// would for the lifetime of the listener.
pub struct MockListener {
    interceptor: Arc<VnodeInterceptor<MockFilesystem>>,
}

impl MockScope {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_fail_listen(&self, fail: bool) {
        self.fail_listen.store(fail, Ordering::Relaxed);
    }

    pub fn active_listeners(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

impl AuthorizationScope<MockFilesystem> for MockScope {
    type Listener = MockListener;

    fn listen(
        &self,
        interceptor: Arc<VnodeInterceptor<MockFilesystem>>,
    ) -> Result<MockListener, Errno> {
        if self.fail_listen.load(Ordering::Relaxed) {
            return Err(Errno::ENOMEM);
        }
        self.active.fetch_add(1, Ordering::Relaxed);
        Ok(MockListener { interceptor })
    }

    fn unlisten(&self, listener: MockListener) -> Result<(), Errno> {
        self.active.fetch_sub(1, Ordering::Relaxed);
        drop(listener);
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Interceptor aggregate wired to mocks, with a fast poll period.
pub struct Harness {
    pub fs: Arc<MockFilesystem>,
    pub procs: Arc<MockProcessTable>,
    pub locks: LockGroup,
    pub core: Arc<VnodeInterceptor<MockFilesystem>>,
}

/// Default params with the poll period shrunk for tests.
pub fn fast_params() -> HookParams {
    HookParams {
        response_poll_period: FAST_POLL,
        ..HookParams::default()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_params(fast_params())
    }

    pub fn with_params(params: HookParams) -> Self {
        let fs = MockFilesystem::new();
        let procs = MockProcessTable::new();
        let locks = LockGroup::new("projvfs-test");
        let core = Arc::new(VnodeInterceptor::new(
            Arc::clone(&fs),
            Arc::clone(&procs) as Arc<dyn ProcessTable>,
            params,
            &locks,
        ));
        Self {
            fs,
            procs,
            locks,
            core,
        }
    }

    /// Registers a client and its root in one step.
    pub fn register_provider(
        &self,
        client: &Arc<MockProviderClient>,
        pid: i32,
        root: &str,
    ) -> ProviderHandle {
        let client: Arc<dyn ProviderClient> = Arc::clone(client) as Arc<dyn ProviderClient>;
        let handle = self
            .core
            .register_provider(client, Pid::from_raw(pid))
            .expect("provider slot available");
        self.core
            .register_root(handle, root)
            .expect("root registers");
        handle
    }

    /// Runs one authorization on the calling thread.
    pub fn authorize(&self, path: &str, action: VnodeAction, pid: i32) -> AuthVerdict {
        let vnode = self.fs.node(path);
        self.core.authorize(&VnodeOperation {
            vnode: &vnode,
            parent: None,
            action,
            pid: Pid::from_raw(pid),
        })
    }

    /// Runs one authorization on its own thread, for scenarios that
    /// block on a provider.
    pub fn spawn_authorize(
        &self,
        path: &str,
        action: VnodeAction,
        pid: i32,
    ) -> thread::JoinHandle<AuthVerdict> {
        let core = Arc::clone(&self.core);
        let fs = Arc::clone(&self.fs);
        let path = path.to_string();
        thread::spawn(move || {
            let vnode = fs.node(&path);
            core.authorize(&VnodeOperation {
                vnode: &vnode,
                parent: None,
                action,
                pid: Pid::from_raw(pid),
            })
        })
    }
}
