// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Path-level dispatcher for RTEFS
//!
//! [`RteFs`] is what a kernel bridge talks to. It applies the input gate,
//! resolves the passthrough subtree and forwards everything else to the
//! [`NodeStore`]. The store, the gate and the open-handle table share one
//! lock; build threads take the same lock to reopen the gate.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use tracing::{debug, error};

use crate::agent::BuildAgent;
use crate::config::FsConfig;
use crate::error::{FsError, FsResult};
use crate::gate::{BuildRequest, GateState, InputGate};
use crate::launcher::BuildLauncher;
use crate::passthrough::AttrResolver;
use crate::store::{is_within, read_range, splice, NodeStore, ROOT};
use crate::{DirEntry, HandleId, Node, NodeKind, NodeOrigin, StatfsData};

#[derive(Clone, Debug)]
struct OpenHandle {
    path: String,
    writable: bool,
    /// Content kept alive after the path was unlinked or replaced
    detached: Option<Vec<u8>>,
}

pub(crate) struct FsState {
    pub(crate) store: NodeStore,
    pub(crate) gate: InputGate,
    handles: HashMap<HandleId, OpenHandle>,
}

impl FsState {
    /// Handles still open on a removed file keep a private copy of its content
    fn detach_handles(&mut self, path: &str, content: &[u8]) {
        for handle in self.handles.values_mut() {
            if handle.detached.is_none() && handle.path == path {
                handle.detached = Some(content.to_vec());
            }
        }
    }
}

/// State shared between the dispatcher and its build threads
pub(crate) struct Shared {
    state: Mutex<FsState>,
    pub(crate) idle: Condvar,
}

impl Shared {
    /// A panic while holding the lock leaves plain data behind, so a
    /// poisoned lock is taken over rather than propagated.
    pub(crate) fn lock(&self) -> MutexGuard<'_, FsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The RTEFS virtual filesystem
pub struct RteFs {
    config: FsConfig,
    shared: Arc<Shared>,
    launcher: BuildLauncher,
    agent: Arc<dyn BuildAgent>,
    resolver: Arc<dyn AttrResolver>,
}

impl RteFs {
    /// Mount-time tree (root plus the reserved directory) resolving real
    /// files through the host filesystem
    #[cfg(unix)]
    pub fn new(config: FsConfig, agent: Arc<dyn BuildAgent>) -> FsResult<Self> {
        Self::with_resolver(config, agent, Arc::new(crate::HostAttrResolver))
    }

    /// Fails with `InvalidArgument` when `config.input_dir` does not name a
    /// directory directly under root.
    pub fn with_resolver(
        mut config: FsConfig,
        agent: Arc<dyn BuildAgent>,
        resolver: Arc<dyn AttrResolver>,
    ) -> FsResult<Self> {
        config.validate()?;
        let mut store = NodeStore::new(config.root_mode);
        store.insert_directory(&config.input_dir, config.input_mode);
        let gate = InputGate::new(config.input_dir.clone());

        let shared = Arc::new(Shared {
            state: Mutex::new(FsState {
                store,
                gate,
                handles: HashMap::new(),
            }),
            idle: Condvar::new(),
        });
        let launcher = BuildLauncher::new(Arc::clone(&shared), Arc::clone(&agent));

        Ok(Self {
            config,
            shared,
            launcher,
            agent,
            resolver,
        })
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn input_dir(&self) -> &str {
        &self.config.input_dir
    }

    fn is_protected(&self, path: &str) -> bool {
        path == ROOT || path == self.config.input_dir
    }

    fn passthrough_relative<'a>(&self, path: &'a str) -> Option<&'a str> {
        path.strip_prefix(self.config.input_dir.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .filter(|rest| !rest.is_empty())
    }

    fn present(&self, state: &FsState, path: &str, mut node: Node) -> Node {
        if path == self.config.input_dir {
            node.permissions = state.gate.visible_permissions(node.permissions);
        }
        node
    }

    // Attribute queries

    /// Attributes of `path`. Unknown paths under the reserved directory are
    /// looked up in the agent's working directory and cached.
    pub fn lookup(&self, path: &str) -> FsResult<Node> {
        {
            let state = self.shared.lock();
            if let Ok(node) = state.store.get(path) {
                if node.origin == NodeOrigin::Local {
                    return Ok(self.present(&state, path, node.clone()));
                }
            }
        }

        if let Some(relative) = self.passthrough_relative(path) {
            let base = self.agent.working_directory();
            let resolved = self.resolver.resolve(&base, relative);
            let mut state = self.shared.lock();
            return match resolved {
                Ok(node) => {
                    let node = state.store.cache_passthrough(path, node);
                    Ok(self.present(&state, path, node))
                }
                Err(FsError::NotFound) => {
                    state.store.drop_passthrough(path);
                    Err(FsError::NotFound)
                }
                Err(err) => Err(err),
            };
        }

        let state = self.shared.lock();
        let node = state.store.get(path)?.clone();
        Ok(self.present(&state, path, node))
    }

    pub fn getattr(&self, path: &str) -> FsResult<Node> {
        self.lookup(path)
    }

    pub fn check_access(&self, path: &str) -> FsResult<()> {
        self.shared.lock().gate.check(path)
    }

    /// The mask is not interpreted; only the gate is enforced.
    pub fn access(&self, path: &str, _mask: i32) -> FsResult<()> {
        self.check_access(path)
    }

    pub fn gate_state(&self) -> GateState {
        self.shared.lock().gate.state()
    }

    /// Block until no build is running or queued. Returns false on timeout.
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let state = self.shared.lock();
        let (state, _) = self
            .shared
            .idle
            .wait_timeout_while(state, timeout, |state| !state.gate.is_idle())
            .unwrap_or_else(PoisonError::into_inner);
        state.gate.is_idle()
    }

    pub fn readdir(&self, path: &str) -> FsResult<Vec<DirEntry>> {
        let state = self.shared.lock();
        let children = state.store.children(path)?;
        let mut entries = Vec::with_capacity(children.len() + 2);
        for dot in [".", ".."] {
            entries.push(DirEntry {
                name: dot.to_string(),
                kind: NodeKind::Directory,
            });
        }
        entries.extend(children);
        Ok(entries)
    }

    pub fn readlink(&self, path: &str) -> FsResult<String> {
        self.shared.lock().store.readlink(path)
    }

    pub fn statfs(&self) -> StatfsData {
        let files = self.shared.lock().store.len() as u64;
        self.config.statfs.to_stats(files)
    }

    // Handles

    pub fn create(&self, path: &str, mode: u32) -> FsResult<HandleId> {
        let mut state = self.shared.lock();
        state.gate.check(path)?;
        let fh = state.store.create(path, mode)?;
        state.handles.insert(
            fh,
            OpenHandle {
                path: path.to_string(),
                writable: true,
                detached: None,
            },
        );
        debug!(target: "rtefs::store", %path, fh = fh.0, "created file");
        Ok(fh)
    }

    /// Open an existing node. Write intent is taken from the access mode in
    /// `flags`.
    pub fn open(&self, path: &str, flags: i32) -> FsResult<HandleId> {
        self.check_access(path)?;
        let node = self.lookup(path)?;
        if node.is_dir() && flags & libc::O_ACCMODE != libc::O_RDONLY {
            return Err(FsError::IsADirectory);
        }

        let mut state = self.shared.lock();
        state.gate.check(path)?;
        let fh = state.store.allocate_handle();
        state.handles.insert(
            fh,
            OpenHandle {
                path: path.to_string(),
                writable: flags & libc::O_ACCMODE != libc::O_RDONLY,
                detached: None,
            },
        );
        Ok(fh)
    }

    /// Close a handle. Releasing a write handle on a regular file under the
    /// reserved directory closes the gate and starts a build of its content.
    pub fn release(&self, fh: HandleId) -> FsResult<()> {
        let mut state = self.shared.lock();
        let handle = state
            .handles
            .remove(&fh)
            .ok_or(FsError::BadFileDescriptor)?;
        if !handle.writable || handle.detached.is_some() {
            return Ok(());
        }
        let Some(filename) = state.gate.relative(&handle.path).map(str::to_string) else {
            return Ok(());
        };
        let is_local_file = state
            .store
            .get(&handle.path)
            .map(|node| node.kind == NodeKind::RegularFile && node.origin == NodeOrigin::Local)
            .unwrap_or(false);
        if !is_local_file {
            return Ok(());
        }

        let request = BuildRequest {
            filename,
            content: state.store.snapshot(&handle.path),
        };
        let Some(request) = state.gate.begin(request) else {
            return Ok(());
        };
        drop(state);

        if let Err(err) = self.launcher.dispatch(request) {
            error!(target: "rtefs::build", error = %err, "failed to spawn build thread");
            self.shared.lock().gate.abort();
            self.shared.idle.notify_all();
            return Err(FsError::Io(err));
        }
        Ok(())
    }

    // Content

    pub fn read(&self, path: &str, size: usize, offset: u64) -> Vec<u8> {
        self.shared.lock().store.read(path, size, offset)
    }

    pub fn write(&self, path: &str, data: &[u8], offset: u64) -> FsResult<usize> {
        let mut state = self.shared.lock();
        state.gate.check(path)?;
        state.store.write(path, data, offset)
    }

    /// Read through an open handle. A handle whose file was unlinked keeps
    /// reading the content it had at that point.
    pub fn read_handle(&self, fh: HandleId, size: usize, offset: u64) -> FsResult<Vec<u8>> {
        let state = self.shared.lock();
        let handle = state.handles.get(&fh).ok_or(FsError::BadFileDescriptor)?;
        Ok(match &handle.detached {
            Some(content) => read_range(content, size, offset),
            None => state.store.read(&handle.path, size, offset),
        })
    }

    pub fn write_handle(&self, fh: HandleId, data: &[u8], offset: u64) -> FsResult<usize> {
        let mut state = self.shared.lock();
        let FsState { store, gate, handles } = &mut *state;
        let handle = handles.get_mut(&fh).ok_or(FsError::BadFileDescriptor)?;
        if !handle.writable {
            return Err(FsError::BadFileDescriptor);
        }
        match &mut handle.detached {
            Some(content) => {
                splice(content, data, offset);
                Ok(data.len())
            }
            None => {
                gate.check(&handle.path)?;
                store.write(&handle.path, data, offset)
            }
        }
    }

    pub fn truncate(&self, path: &str, length: u64) -> FsResult<()> {
        let mut state = self.shared.lock();
        state.gate.check(path)?;
        state.store.truncate(path, length)
    }

    // Namespace

    pub fn mkdir(&self, path: &str, mode: u32) -> FsResult<()> {
        let mut state = self.shared.lock();
        state.gate.check(path)?;
        state.store.mkdir(path, mode)
    }

    pub fn rmdir(&self, path: &str) -> FsResult<()> {
        if self.is_protected(path) {
            return Err(FsError::Busy);
        }
        let mut state = self.shared.lock();
        state.gate.check(path)?;
        state.store.rmdir(path)
    }

    pub fn unlink(&self, path: &str) -> FsResult<()> {
        if self.is_protected(path) {
            return Err(FsError::Busy);
        }
        let mut state = self.shared.lock();
        state.gate.check(path)?;
        let content = state.store.snapshot(path);
        state.store.unlink(path)?;
        state.detach_handles(path, &content);
        Ok(())
    }

    pub fn symlink(&self, link_path: &str, target: &str) -> FsResult<()> {
        let mut state = self.shared.lock();
        state.gate.check(link_path)?;
        state.store.symlink(link_path, target)
    }

    /// Move `old` to `new`, replacing `new` if present. Open handles follow
    /// the moved paths.
    pub fn rename(&self, old: &str, new: &str) -> FsResult<()> {
        if self.is_protected(old) || self.is_protected(new) {
            return Err(FsError::Busy);
        }
        let mut state = self.shared.lock();
        state.gate.check(old)?;
        state.gate.check(new)?;
        let replaced = state.store.snapshot(new);
        state.store.rename(old, new)?;
        if old != new {
            state.detach_handles(new, &replaced);
        }
        for handle in state.handles.values_mut() {
            if is_within(&handle.path, old) {
                handle.path = format!("{new}{}", &handle.path[old.len()..]);
            }
        }
        Ok(())
    }

    // Metadata

    pub fn chmod(&self, path: &str, mode: u32) -> FsResult<()> {
        self.shared.lock().store.chmod(path, mode)
    }

    pub fn chown(&self, path: &str, uid: Option<u32>, gid: Option<u32>) -> FsResult<()> {
        self.shared.lock().store.chown(path, uid, gid)
    }

    pub fn utimens(&self, path: &str, times: Option<(SystemTime, SystemTime)>) -> FsResult<()> {
        self.shared.lock().store.utimens(path, times)
    }

    // Extended attributes

    fn materialize(&self, path: &str) -> FsResult<()> {
        if self.passthrough_relative(path).is_some() {
            self.lookup(path)?;
        }
        Ok(())
    }

    pub fn getxattr(&self, path: &str, name: &str) -> FsResult<Vec<u8>> {
        self.materialize(path)?;
        self.shared.lock().store.xattr_get(path, name)
    }

    pub fn setxattr(&self, path: &str, name: &str, value: &[u8]) -> FsResult<()> {
        self.materialize(path)?;
        self.shared.lock().store.xattr_set(path, name, value)
    }

    pub fn listxattr(&self, path: &str) -> FsResult<Vec<String>> {
        self.materialize(path)?;
        self.shared.lock().store.xattr_list(path)
    }

    pub fn removexattr(&self, path: &str, name: &str) -> FsResult<()> {
        self.materialize(path)?;
        self.shared.lock().store.xattr_remove(path, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{RecordingAgent, StaticResolver};
    use std::path::PathBuf;

    const WAIT: Duration = Duration::from_secs(5);

    fn create_test_fs() -> (RteFs, Arc<RecordingAgent>, Arc<StaticResolver>) {
        let agent = Arc::new(RecordingAgent::new(PathBuf::from("/work")));
        let resolver = Arc::new(StaticResolver::new());
        let fs = RteFs::with_resolver(FsConfig::default(), agent.clone(), resolver.clone())
            .expect("default config is valid");
        (fs, agent, resolver)
    }

    fn write_file(fs: &RteFs, path: &str, content: &[u8]) {
        let fh = fs.create(path, 0o644).expect("create should succeed");
        fs.write(path, content, 0).expect("write should succeed");
        fs.release(fh).expect("release should succeed");
    }

    #[test]
    fn test_mount_skeleton() {
        let (fs, _, _) = create_test_fs();
        let root = fs.getattr("/").expect("root");
        assert!(root.is_dir());
        assert!(root.link_count >= 2);

        let input = fs.getattr("/input").expect("input dir");
        assert!(input.is_dir());
        assert_eq!(input.permissions, 0o777);
        assert_eq!(fs.gate_state(), GateState::Open);
    }

    #[test]
    fn test_access_outside_input_ignores_gate() {
        let (fs, agent, _) = create_test_fs();
        agent.hold_builds();
        write_file(&fs, "/input/a.c", b"a");
        assert_eq!(fs.gate_state(), GateState::Closed);

        for path in ["/", "/other", "/inputs", "/tmp/input"] {
            fs.check_access(path).expect("paths outside the gate stay accessible");
        }

        agent.release_builds();
        assert!(fs.wait_for_idle(WAIT));
    }

    #[test]
    fn test_build_cycle_gates_access() {
        let (fs, agent, _) = create_test_fs();
        agent.hold_builds();

        write_file(&fs, "/input/main.c", b"int main(){}");
        assert!(agent.wait_for_submissions(1, WAIT), "agent should receive the build");

        assert!(matches!(fs.check_access("/input"), Err(FsError::PermissionDenied)));
        assert!(matches!(fs.access("/input/main.c", libc::R_OK), Err(FsError::PermissionDenied)));
        assert!(matches!(fs.create("/input/other.c", 0o644), Err(FsError::PermissionDenied)));
        assert!(matches!(fs.open("/input/main.c", libc::O_RDONLY), Err(FsError::PermissionDenied)));
        assert!(matches!(fs.write("/input/main.c", b"x", 0), Err(FsError::PermissionDenied)));
        assert!(matches!(fs.truncate("/input/main.c", 0), Err(FsError::PermissionDenied)));
        assert!(matches!(fs.unlink("/input/main.c"), Err(FsError::PermissionDenied)));
        assert!(matches!(fs.mkdir("/input/sub", 0o755), Err(FsError::PermissionDenied)));
        assert!(matches!(fs.rename("/input/main.c", "/main.c"), Err(FsError::PermissionDenied)));
        assert_eq!(fs.getattr("/input").expect("getattr stays available").permissions, 0);
        fs.readdir("/input").expect("readdir stays available");

        agent.release_builds();
        assert!(fs.wait_for_idle(WAIT), "gate should reopen once the agent returns");
        fs.check_access("/input").expect("gate open again");
        assert_eq!(fs.getattr("/input").unwrap().permissions, 0o777);

        assert_eq!(
            agent.submissions(),
            vec![("main.c".to_string(), b"int main(){}".to_vec())]
        );
        let names: Vec<String> = fs
            .readdir("/input")
            .unwrap()
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert!(names.contains(&"main.c".to_string()));
    }

    #[test]
    fn test_close_outside_input_does_not_build() {
        let (fs, agent, _) = create_test_fs();
        write_file(&fs, "/notes.txt", b"hello");
        assert_eq!(fs.gate_state(), GateState::Open);
        assert!(agent.submissions().is_empty());
    }

    #[test]
    fn test_read_only_close_does_not_build() {
        let (fs, agent, _) = create_test_fs();
        write_file(&fs, "/input/a.c", b"a");
        assert!(fs.wait_for_idle(WAIT));

        let fh = fs.open("/input/a.c", libc::O_RDONLY).expect("open");
        assert_eq!(fs.read("/input/a.c", 10, 0), b"a");
        fs.release(fh).expect("release");
        assert_eq!(fs.gate_state(), GateState::Open);
        assert_eq!(agent.submissions().len(), 1);
    }

    #[test]
    fn test_builds_never_overlap_and_newest_queued_wins() {
        let (fs, agent, _) = create_test_fs();
        agent.hold_builds();

        // Handles opened before the gate closes can still be released.
        let mut handles = Vec::new();
        for (name, body) in [("a.c", b"a1"), ("b.c", b"b1"), ("c.c", b"c1")] {
            let path = format!("/input/{name}");
            let fh = fs.create(&path, 0o644).expect("create");
            fs.write(&path, body, 0).expect("write");
            handles.push(fh);
        }

        fs.release(handles[0]).expect("release a");
        assert!(agent.wait_for_submissions(1, WAIT));
        fs.release(handles[1]).expect("release b");
        fs.release(handles[2]).expect("release c");
        assert_eq!(agent.submissions().len(), 1, "queued builds wait for the running one");
        assert_eq!(fs.gate_state(), GateState::Closed);

        agent.release_builds();
        assert!(fs.wait_for_idle(WAIT));
        assert_eq!(
            agent.submissions(),
            vec![
                ("a.c".to_string(), b"a1".to_vec()),
                ("c.c".to_string(), b"c1".to_vec()),
            ]
        );
    }

    #[test]
    fn test_release_unknown_handle() {
        let (fs, _, _) = create_test_fs();
        assert!(matches!(fs.release(HandleId(999)), Err(FsError::BadFileDescriptor)));
    }

    #[test]
    fn test_handles_are_never_reused() {
        let (fs, _, _) = create_test_fs();
        let a = fs.create("/a", 0o644).unwrap();
        fs.release(a).unwrap();
        let b = fs.open("/a", libc::O_RDONLY).unwrap();
        fs.release(b).unwrap();
        let c = fs.create("/c", 0o644).unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (fs, _, _) = create_test_fs();
        let fh = fs.create("/data.bin", 0o600).unwrap();
        fs.write("/data.bin", b"\x00\x01payload", 0).unwrap();
        assert_eq!(fs.read("/data.bin", 9, 0), b"\x00\x01payload");
        assert_eq!(fs.getattr("/data.bin").unwrap().size, 9);
        fs.release(fh).unwrap();
    }

    #[test]
    fn test_truncate_twice() {
        let (fs, _, _) = create_test_fs();
        let fh = fs.create("/f", 0o644).unwrap();
        fs.write("/f", b"0123456789", 0).unwrap();
        fs.truncate("/f", 3).unwrap();
        fs.truncate("/f", 3).unwrap();
        assert_eq!(fs.read("/f", 100, 0), b"012");
        assert_eq!(fs.getattr("/f").unwrap().size, 3);
        fs.release(fh).unwrap();
    }

    #[test]
    fn test_mkdir_rmdir_restores_root_links() {
        let (fs, _, _) = create_test_fs();
        let before = fs.getattr("/").unwrap().link_count;
        fs.mkdir("/a", 0o755).unwrap();
        assert_eq!(fs.getattr("/").unwrap().link_count, before + 1);
        fs.rmdir("/a").unwrap();
        assert_eq!(fs.getattr("/").unwrap().link_count, before);
    }

    #[test]
    fn test_rename_moves_node() {
        let (fs, _, _) = create_test_fs();
        let fh = fs.create("/a", 0o640).unwrap();
        fs.write("/a", b"moved", 0).unwrap();
        let before = fs.getattr("/a").unwrap();

        fs.rename("/a", "/b").unwrap();
        let after = fs.getattr("/b").unwrap();
        assert_eq!(after.mode(), before.mode());
        assert_eq!(after.size, before.size);
        assert_eq!(fs.read("/b", 5, 0), b"moved");
        assert!(matches!(fs.getattr("/a"), Err(FsError::NotFound)));
        fs.release(fh).unwrap();
    }

    #[test]
    fn test_rename_into_input_builds_under_new_name() {
        let (fs, agent, _) = create_test_fs();
        let fh = fs.create("/draft.c", 0o644).unwrap();
        fs.write("/draft.c", b"draft", 0).unwrap();
        fs.rename("/draft.c", "/input/final.c").unwrap();
        fs.release(fh).unwrap();

        assert!(fs.wait_for_idle(WAIT));
        assert_eq!(agent.submissions(), vec![("final.c".to_string(), b"draft".to_vec())]);
    }

    #[test]
    fn test_protected_directories() {
        let (fs, _, _) = create_test_fs();
        assert!(matches!(fs.rmdir("/"), Err(FsError::Busy)));
        assert!(matches!(fs.rmdir("/input"), Err(FsError::Busy)));
        assert!(matches!(fs.rename("/input", "/elsewhere"), Err(FsError::Busy)));
        fs.mkdir("/d", 0o755).unwrap();
        assert!(matches!(fs.rename("/d", "/input"), Err(FsError::Busy)));
        assert!(matches!(fs.mkdir("/input", 0o755), Err(FsError::AlreadyExists)));
    }

    #[test]
    fn test_chmod_input_keeps_gate_separate() {
        let (fs, agent, _) = create_test_fs();
        fs.chmod("/input", 0o750).unwrap();
        assert_eq!(fs.getattr("/input").unwrap().permissions, 0o750);

        agent.hold_builds();
        write_file(&fs, "/input/x.c", b"x");
        assert_eq!(fs.getattr("/input").unwrap().permissions, 0);
        fs.chmod("/input", 0o700).unwrap();
        assert_eq!(fs.getattr("/input").unwrap().permissions, 0, "closed gate hides permissions");
        assert_eq!(fs.gate_state(), GateState::Closed, "chmod does not open the gate");

        agent.release_builds();
        assert!(fs.wait_for_idle(WAIT));
        assert_eq!(fs.getattr("/input").unwrap().permissions, 0o700);
    }

    #[test]
    fn test_readdir_lists_direct_children() {
        let (fs, _, _) = create_test_fs();
        fs.mkdir("/src", 0o755).unwrap();
        let fh = fs.create("/src/lib.c", 0o644).unwrap();
        fs.release(fh).unwrap();

        let names: Vec<String> = fs.readdir("/").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec![".", "..", "input", "src"]);
        assert!(matches!(fs.readdir("/missing"), Err(FsError::NotFound)));
        assert!(matches!(fs.readdir("/src/lib.c"), Err(FsError::NotADirectory)));
    }

    #[test]
    fn test_symlink_roundtrip() {
        let (fs, _, _) = create_test_fs();
        fs.symlink("/link", "/input/main.c").unwrap();
        assert_eq!(fs.readlink("/link").unwrap(), "/input/main.c");
        assert_eq!(fs.getattr("/link").unwrap().kind, NodeKind::Symlink);
    }

    #[test]
    fn test_getxattr_missing_is_empty() {
        let (fs, _, _) = create_test_fs();
        let fh = fs.create("/f", 0o644).unwrap();
        assert!(fs.getxattr("/f", "user.never").unwrap().is_empty());
        fs.removexattr("/f", "user.never").expect("removing a missing attribute is a no-op");

        fs.setxattr("/f", "user.tag", b"v").unwrap();
        assert_eq!(fs.listxattr("/f").unwrap(), vec!["user.tag"]);
        fs.release(fh).unwrap();
    }

    #[test]
    fn test_passthrough_lookup_caches_and_refreshes() {
        let (fs, _, resolver) = create_test_fs();
        let mut real = Node::regular(0o600);
        real.size = 42;
        resolver.insert("lib.h", real.clone());

        let node = fs.getattr("/input/lib.h").expect("resolved from working directory");
        assert_eq!(node.size, 42);
        assert_eq!(node.origin, NodeOrigin::Passthrough);
        assert_eq!(resolver.calls(), vec![(PathBuf::from("/work"), "lib.h".to_string())]);

        real.size = 7;
        resolver.insert("lib.h", real);
        assert_eq!(fs.getattr("/input/lib.h").unwrap().size, 7);

        resolver.remove("lib.h");
        assert!(matches!(fs.getattr("/input/lib.h"), Err(FsError::NotFound)));
        assert!(matches!(fs.getattr("/input/missing.h"), Err(FsError::NotFound)));
    }

    #[test]
    fn test_local_node_shadows_real_file() {
        let (fs, _, resolver) = create_test_fs();
        let mut real = Node::regular(0o600);
        real.size = 1000;
        resolver.insert("main.c", real);

        write_file(&fs, "/input/main.c", b"local");
        assert!(fs.wait_for_idle(WAIT));
        assert_eq!(fs.getattr("/input/main.c").unwrap().size, 5);
        assert!(resolver.calls().is_empty());
    }

    #[test]
    fn test_resolver_errors_surface() {
        let mut resolver = crate::passthrough::MockAttrResolver::new();
        resolver
            .expect_resolve()
            .withf(|base, relative| base == std::path::Path::new("/work") && relative == "locked.h")
            .times(1)
            .returning(|_, _| Err(FsError::Io(std::io::Error::from_raw_os_error(libc::EACCES))));
        let agent = Arc::new(RecordingAgent::new("/work"));
        let fs = RteFs::with_resolver(FsConfig::default(), agent, Arc::new(resolver))
            .expect("default config is valid");

        match fs.getattr("/input/locked.h") {
            Err(FsError::Io(err)) => assert_eq!(err.raw_os_error(), Some(libc::EACCES)),
            other => panic!("expected io error, got {other:?}"),
        }
    }

    #[test]
    fn test_editing_real_file_builds_it() {
        let (fs, agent, resolver) = create_test_fs();
        resolver.insert("util.c", Node::regular(0o644));

        let fh = fs.open("/input/util.c", libc::O_RDWR).expect("open real file");
        fs.write("/input/util.c", b"void f(){}", 0).unwrap();
        fs.release(fh).unwrap();

        assert!(fs.wait_for_idle(WAIT));
        assert_eq!(agent.submissions(), vec![("util.c".to_string(), b"void f(){}".to_vec())]);
        assert_eq!(fs.getattr("/input/util.c").unwrap().origin, NodeOrigin::Local);
    }

    #[test]
    fn test_passthrough_only_under_input() {
        let (fs, _, resolver) = create_test_fs();
        resolver.insert("top.c", Node::regular(0o644));
        assert!(matches!(fs.getattr("/top.c"), Err(FsError::NotFound)));
        assert!(resolver.calls().is_empty());
    }

    #[test]
    fn test_statfs_reports_configured_constants() {
        let (fs, _, _) = create_test_fs();
        let stats = fs.statfs();
        assert_eq!(stats.block_size, 512);
        assert_eq!(stats.blocks, 4096);
        assert_eq!(stats.blocks_free, 2048);
        assert_eq!(stats.name_max, 255);
        assert_eq!(stats.files, 2);
    }

    #[test]
    fn test_mutations_on_existing_paths() {
        let (fs, _, _) = create_test_fs();
        fs.mkdir("/d", 0o755).unwrap();
        assert!(matches!(fs.create("/d", 0o644), Err(FsError::AlreadyExists)));
        assert!(matches!(fs.symlink("/d", "x"), Err(FsError::AlreadyExists)));
        assert!(matches!(fs.unlink("/d"), Err(FsError::IsADirectory)));
        assert!(matches!(fs.open("/d", libc::O_WRONLY), Err(FsError::IsADirectory)));
        assert!(matches!(fs.open("/nope", libc::O_RDONLY), Err(FsError::NotFound)));
    }

    #[test]
    fn test_trailing_slash_input_dir_still_builds() {
        let agent = Arc::new(RecordingAgent::new("/work"));
        let config = FsConfig {
            input_dir: "/input/".to_string(),
            ..FsConfig::default()
        };
        let fs = RteFs::with_resolver(config, agent.clone(), Arc::new(StaticResolver::new()))
            .expect("trailing slash is accepted");
        assert_eq!(fs.input_dir(), "/input");
        let names: Vec<String> = fs.readdir("/").unwrap().into_iter().map(|e| e.name).collect();
        assert!(names.contains(&"input".to_string()));

        write_file(&fs, "/input/main.c", b"int main(){}");
        assert!(fs.wait_for_idle(WAIT));
        assert_eq!(agent.submissions(), vec![("main.c".to_string(), b"int main(){}".to_vec())]);
    }

    #[test]
    fn test_unusable_input_dir_is_rejected() {
        for bad in ["", "/", "input"] {
            let config = FsConfig {
                input_dir: bad.to_string(),
                ..FsConfig::default()
            };
            let agent = Arc::new(RecordingAgent::new("/work"));
            let result = RteFs::with_resolver(config, agent, Arc::new(StaticResolver::new()));
            assert!(matches!(result, Err(FsError::InvalidArgument)), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_failed_build_reopens_gate() {
        let (fs, agent, _) = create_test_fs();
        agent.fail_builds();
        write_file(&fs, "/input/broken.c", b"int main(");

        assert!(fs.wait_for_idle(WAIT), "gate should reopen after a failed build");
        assert_eq!(fs.gate_state(), GateState::Open);
        assert_eq!(agent.submissions().len(), 1);

        let fh = fs.open("/input/broken.c", libc::O_WRONLY).unwrap();
        fs.write("/input/broken.c", b"int main(){}", 0).unwrap();
        fs.release(fh).unwrap();
        assert!(fs.wait_for_idle(WAIT));
        assert_eq!(agent.submissions().len(), 2);
    }

    #[test]
    fn test_unlinked_file_stays_usable_through_its_handle() {
        let (fs, agent, _) = create_test_fs();
        let fh = fs.create("/input/tmp.c", 0o644).unwrap();
        fs.write_handle(fh, b"int x;", 0).unwrap();
        fs.unlink("/input/tmp.c").unwrap();
        assert!(matches!(fs.getattr("/input/tmp.c"), Err(FsError::NotFound)));

        assert_eq!(fs.read_handle(fh, 64, 0).unwrap(), b"int x;");
        assert_eq!(fs.write_handle(fh, b" int y;", 6).unwrap(), 7);
        assert_eq!(fs.read_handle(fh, 64, 0).unwrap(), b"int x; int y;");

        // The original path is free again and unaffected by the handle.
        write_file(&fs, "/input/tmp.c", b"fresh");
        assert!(fs.wait_for_idle(WAIT));
        assert_eq!(fs.read("/input/tmp.c", 64, 0), b"fresh");

        fs.release(fh).unwrap();
        assert!(fs.wait_for_idle(WAIT));
        assert_eq!(agent.submissions(), vec![("tmp.c".to_string(), b"fresh".to_vec())]);
    }

    #[test]
    fn test_replaced_file_handle_keeps_old_content() {
        let (fs, _, _) = create_test_fs();
        write_file(&fs, "/old", b"old");
        write_file(&fs, "/new", b"new");
        let reader = fs.open("/old", libc::O_RDONLY).unwrap();
        fs.rename("/new", "/old").unwrap();

        assert_eq!(fs.read_handle(reader, 16, 0).unwrap(), b"old");
        assert_eq!(fs.read("/old", 16, 0), b"new");
        assert!(matches!(
            fs.write_handle(reader, b"x", 0),
            Err(FsError::BadFileDescriptor)
        ));
        fs.release(reader).unwrap();
        assert!(matches!(fs.read_handle(reader, 1, 0), Err(FsError::BadFileDescriptor)));
    }
}
