//! Background thread that drives the [`IndexBuilder`]
//!
//! Callers talk to the build through a command channel; the thread applies
//! commands between pages, steps the builder, and publishes an
//! [`IndexStatus`] snapshot after every change.

use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use super::builder::{IndexBuilder, MailboxEvent, StepOutcome};
use crate::environment::{DeviceProbe, Observation};
use crate::error::{IndexError, Result};
use crate::models::{IndexStatus, PauseReason};

enum Command {
    Enable,
    Pause,
    Resume,
    Observe(Observation),
    Event(MailboxEvent),
    SetStorageLimit(Option<u64>),
    Delete(Sender<Result<()>>),
    Rebuild(Sender<Result<()>>),
    Shutdown,
}

/// Where the worker waits before its next step
enum Wait {
    None,
    Forever,
    For(Duration),
}

pub struct BuildCoordinator {
    commands: Sender<Command>,
    status: Arc<RwLock<IndexStatus>>,
    handle: Option<JoinHandle<()>>,
}

impl BuildCoordinator {
    /// Start the build thread
    ///
    /// `start` restores the builder on the new thread. Until it returns the
    /// published state is `Undetermined`; if it fails the thread exits and
    /// later commands fail with [`IndexError::Stopped`].
    ///
    /// `index_root` is polled for free disk space through `probe` while a
    /// build is in progress. `retry_delay` is how long a build paused by a
    /// remote or storage condition waits before trying again.
    pub fn spawn(
        start: impl FnOnce() -> Result<IndexBuilder> + Send + 'static,
        probe: Arc<dyn DeviceProbe>,
        index_root: PathBuf,
        retry_delay: Duration,
    ) -> Result<Self> {
        let (commands, receiver) = mpsc::channel();
        let status = Arc::new(RwLock::new(IndexStatus::undetermined()));

        let published = status.clone();
        let handle = thread::Builder::new()
            .name("esearch-build".into())
            .spawn(move || {
                let builder = match start() {
                    Ok(builder) => builder,
                    Err(e) => {
                        error!("Failed to restore index build: {}", e);
                        return;
                    }
                };
                let worker = Worker {
                    builder,
                    commands: receiver,
                    status: published,
                    probe,
                    index_root,
                    retry_delay,
                };
                worker.publish();
                worker.run();
            })
            .map_err(|e| IndexError::Storage(format!("failed to start build thread: {e}")))?;

        Ok(Self {
            commands,
            status,
            handle: Some(handle),
        })
    }

    pub fn enable(&self) -> Result<()> {
        self.send(Command::Enable)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(Command::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(Command::Resume)
    }

    pub fn observe(&self, observation: Observation) -> Result<()> {
        self.send(Command::Observe(observation))
    }

    pub fn apply_event(&self, event: MailboxEvent) -> Result<()> {
        self.send(Command::Event(event))
    }

    pub fn set_storage_limit(&self, limit: Option<u64>) -> Result<()> {
        self.send(Command::SetStorageLimit(limit))
    }

    /// Delete the index and wait until it is gone
    pub fn delete(&self) -> Result<()> {
        let (reply, done) = mpsc::channel();
        self.send(Command::Delete(reply))?;
        done.recv().map_err(|_| IndexError::Stopped)?
    }

    /// Delete the index and start building again
    pub fn rebuild(&self) -> Result<()> {
        let (reply, done) = mpsc::channel();
        self.send(Command::Rebuild(reply))?;
        done.recv().map_err(|_| IndexError::Stopped)?
    }

    /// Latest published status
    pub fn status(&self) -> IndexStatus {
        match self.status.read() {
            Ok(status) => status.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Poll the status until `done` accepts it or `timeout` passes.
    /// Returns the last status seen.
    pub fn wait_until(
        &self,
        timeout: Duration,
        done: impl Fn(&IndexStatus) -> bool,
    ) -> Option<IndexStatus> {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.status();
            if done(&status) {
                return Some(status);
            }
            if Instant::now() >= deadline {
                return None;
            }
            thread::sleep(Duration::from_millis(10));
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).map_err(|_| IndexError::Stopped)
    }
}

impl Drop for BuildCoordinator {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Build thread panicked");
            }
        }
    }
}

struct Worker {
    builder: IndexBuilder,
    commands: Receiver<Command>,
    status: Arc<RwLock<IndexStatus>>,
    probe: Arc<dyn DeviceProbe>,
    index_root: PathBuf,
    retry_delay: Duration,
}

impl Worker {
    fn run(mut self) {
        debug!("Build thread started");
        loop {
            // Commands first so a pause lands before the next page
            loop {
                match self.commands.try_recv() {
                    Ok(command) => {
                        if !self.handle(command) {
                            return self.stop();
                        }
                    }
                    Err(mpsc::TryRecvError::Empty) => break,
                    Err(mpsc::TryRecvError::Disconnected) => return self.stop(),
                }
            }

            if self.builder.is_building() {
                self.poll_disk();
            }

            let wait = match self.builder.step() {
                Ok(StepOutcome::Progressed) => Wait::None,
                Ok(StepOutcome::Completed) if self.builder.pending_events() > 0 => Wait::None,
                Ok(StepOutcome::Paused) if self.needs_retry() => Wait::For(self.retry_delay),
                Ok(StepOutcome::Idle | StepOutcome::Completed | StepOutcome::Paused) => {
                    Wait::Forever
                }
                Err(e) => {
                    error!("Index build step failed: {}", e);
                    Wait::For(self.retry_delay)
                }
            };
            self.publish();

            let received = match wait {
                Wait::None => continue,
                Wait::Forever => self.commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
                Wait::For(delay) => self.commands.recv_timeout(delay),
            };
            match received {
                Ok(command) => {
                    if !self.handle(command) {
                        return self.stop();
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(e) = self.builder.clear_remote_failure() {
                        warn!("Failed to clear remote pause: {}", e);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return self.stop(),
            }
        }
    }

    /// Apply one command. Returns false on shutdown.
    fn handle(&mut self, command: Command) -> bool {
        let result = match command {
            Command::Enable => self.builder.enable(),
            Command::Pause => self.builder.pause_by_user(),
            Command::Resume => self.builder.resume(),
            Command::Observe(observation) => self.builder.observe(observation),
            Command::Event(event) => self.builder.apply_event(event),
            Command::SetStorageLimit(limit) => self.builder.set_storage_limit(limit),
            Command::Delete(reply) => {
                let result = self.builder.delete();
                self.publish();
                let _ = reply.send(result);
                return true;
            }
            Command::Rebuild(reply) => {
                let result = self.builder.delete().and_then(|_| self.builder.enable());
                self.publish();
                let _ = reply.send(result);
                return true;
            }
            Command::Shutdown => return false,
        };
        if let Err(e) = result {
            warn!("Build command failed: {}", e);
        }
        self.publish();
        true
    }

    /// Paused on a condition only time can clear
    fn needs_retry(&self) -> bool {
        let flags = &self.builder.session().pause_flags;
        self.builder.waiting_for_remote()
            || (flags.contains(PauseReason::LowStorage) && !flags.needs_explicit_resume())
    }

    fn poll_disk(&mut self) {
        let Some(free) = self.probe.free_disk_space(&self.index_root) else {
            return;
        };
        if let Err(e) = self.builder.observe(Observation::FreeStorage(free)) {
            warn!("Failed to apply free disk observation: {}", e);
        }
    }

    fn publish(&self) {
        let status = self.builder.status();
        if let Ok(mut published) = self.status.write() {
            *published = status;
        }
    }

    fn stop(&self) {
        info!("Build thread stopping in phase {:?}", self.builder.phase());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::build::builder::BuilderParts;
    use crate::config::IndexConfig;
    use crate::crypto::{Cipher, IndexKey};
    use crate::environment::{FixedProbe, NetworkStatus};
    use crate::metrics::NoopMetrics;
    use crate::models::{IndexState, MessageId};
    use crate::remote::PageFetcher;
    use crate::store::{InMemoryIndexStore, IndexStore};
    use crate::testing::{FakeRemote, OneKey, PlainDecrypter, message};
    use crate::transform::ContentTransformer;

    const WAIT: Duration = Duration::from_secs(10);

    fn coordinator(
        remote: Arc<FakeRemote>,
        store: Arc<dyn IndexStore>,
        free_disk: u64,
    ) -> BuildCoordinator {
        let config = IndexConfig {
            page_size: 2,
            foreground_workers: 2,
            ..IndexConfig::default()
        };
        let parts = BuilderParts {
            store,
            fetcher: PageFetcher::new(remote, &config).with_sleep(|_| {}),
            transformer: Arc::new(ContentTransformer::new(
                Arc::new(OneKey),
                Arc::new(PlainDecrypter),
            )),
            cipher: Arc::new(Cipher::new(&IndexKey::from_bytes([3; 32]))),
            metrics: Arc::new(NoopMetrics),
            feed: None,
        };
        let probe = Arc::new(FixedProbe {
            available_memory: 1 << 30,
            free_disk_space: Some(free_disk),
        });
        BuildCoordinator::spawn(
            move || IndexBuilder::new("user-1", config, parts),
            probe,
            PathBuf::from("."),
            Duration::from_millis(20),
        )
        .unwrap()
    }

    fn complete(status: &IndexStatus) -> bool {
        status.state == IndexState::Complete
    }

    #[test]
    fn test_builds_in_background() {
        let remote = Arc::new(FakeRemote::numbered(5));
        let store = Arc::new(InMemoryIndexStore::new());
        let coordinator = coordinator(remote, store.clone(), u64::MAX);

        coordinator
            .wait_until(WAIT, |s| s.state == IndexState::Disabled)
            .unwrap();
        coordinator.enable().unwrap();

        let status = coordinator.wait_until(WAIT, complete).unwrap();
        assert_eq!(status.processed_messages, 5);
        assert_eq!(store.count().unwrap(), 5);
    }

    #[test]
    fn test_remote_outage_is_retried() {
        let remote = Arc::new(FakeRemote::numbered(3));
        remote.set_failing(true);
        let coordinator = coordinator(remote.clone(), Arc::new(InMemoryIndexStore::new()), u64::MAX);
        coordinator.enable().unwrap();

        let paused = coordinator
            .wait_until(WAIT, |s| s.pause_reasons.contains(&PauseReason::RemoteUnavailable))
            .unwrap();
        assert_eq!(paused.state, IndexState::Paused);

        remote.set_failing(false);
        let status = coordinator.wait_until(WAIT, complete).unwrap();
        assert_eq!(status.processed_messages, 3);
    }

    #[test]
    fn test_low_disk_pauses_build() {
        let remote = Arc::new(FakeRemote::numbered(3));
        let coordinator = coordinator(remote, Arc::new(InMemoryIndexStore::new()), 1024);
        coordinator.enable().unwrap();

        let status = coordinator
            .wait_until(WAIT, |s| s.state == IndexState::LowStorage)
            .unwrap();
        assert_eq!(status.processed_messages, 0);
    }

    #[test]
    fn test_offline_then_online() {
        let remote = Arc::new(FakeRemote::numbered(3));
        let coordinator = coordinator(remote, Arc::new(InMemoryIndexStore::new()), u64::MAX);
        coordinator
            .observe(Observation::Network(NetworkStatus::Unreachable))
            .unwrap();
        coordinator.enable().unwrap();
        coordinator
            .wait_until(WAIT, |s| s.state == IndexState::Paused)
            .unwrap();

        coordinator.observe(Observation::Network(NetworkStatus::Wifi)).unwrap();
        coordinator.wait_until(WAIT, complete).unwrap();
    }

    #[test]
    fn test_events_and_delete() {
        let remote = Arc::new(FakeRemote::numbered(2));
        let store = Arc::new(InMemoryIndexStore::new());
        let coordinator = coordinator(remote, store.clone(), u64::MAX);
        coordinator.enable().unwrap();
        coordinator.wait_until(WAIT, complete).unwrap();

        coordinator
            .apply_event(MailboxEvent::Insert(message("new", 50_000, "hi", "there")))
            .unwrap();
        coordinator
            .wait_until(WAIT, |s| s.total_messages == 3)
            .unwrap();
        assert!(store.get(&MessageId::new("new")).unwrap().is_some());

        coordinator.delete().unwrap();
        assert_eq!(coordinator.status().state, IndexState::Disabled);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_rebuild_refetches_everything() {
        let remote = Arc::new(FakeRemote::numbered(2));
        let store = Arc::new(InMemoryIndexStore::new());
        let coordinator = coordinator(remote.clone(), store.clone(), u64::MAX);
        coordinator.enable().unwrap();
        coordinator.wait_until(WAIT, complete).unwrap();
        let calls = remote.detail_calls.load(Ordering::SeqCst);

        coordinator.rebuild().unwrap();
        coordinator.wait_until(WAIT, complete).unwrap();
        assert_eq!(remote.detail_calls.load(Ordering::SeqCst), calls + 2);
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_status_is_undetermined_until_session_loads() {
        let (release, gate) = mpsc::channel::<()>();
        let probe = Arc::new(FixedProbe {
            available_memory: 1 << 30,
            free_disk_space: None,
        });
        let coordinator = BuildCoordinator::spawn(
            move || {
                let _ = gate.recv();
                Err(IndexError::Storage("session unreadable".into()))
            },
            probe,
            PathBuf::from("."),
            Duration::from_millis(20),
        )
        .unwrap();
        assert_eq!(coordinator.status().state, IndexState::Undetermined);

        // A build that never started rejects commands
        release.send(()).unwrap();
        assert!(matches!(coordinator.delete(), Err(IndexError::Stopped)));
        assert_eq!(coordinator.status().state, IndexState::Undetermined);
    }
}
