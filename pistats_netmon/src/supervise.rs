//! Lifecycle supervision of the broadcaster child process.
//!
//! The supervisor is a small state machine driven once per poll by the
//! connectivity result. Process access goes through `ProcessControl` so
//! the machine is testable without touching the OS.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, error, info, warn};

/// Minimal handle over a supervised OS process.
pub trait ProcessControl {
    /// Start the process; returns its PID.
    fn spawn(&mut self) -> std::io::Result<u32>;
    fn is_alive(&mut self) -> bool;
    /// Request graceful termination (SIGTERM).
    fn terminate(&mut self);
    /// Force-terminate and reap.
    fn kill(&mut self);
}

/// The real broadcaster process, spawned from a binary path.
pub struct AgentProcess {
    program: PathBuf,
    child: Option<Child>,
}

impl AgentProcess {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            child: None,
        }
    }
}

impl ProcessControl for AgentProcess {
    fn spawn(&mut self) -> std::io::Result<u32> {
        let child = Command::new(&self.program).stdin(Stdio::null()).spawn()?;
        let pid = child.id();
        self.child = Some(child);
        Ok(pid)
    }

    fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(None) => true,
                Ok(Some(status)) => {
                    debug!(%status, "child exited");
                    self.child = None;
                    false
                }
                Err(err) => {
                    warn!(%err, "failed to poll child status");
                    false
                }
            },
            None => false,
        }
    }

    fn terminate(&mut self) {
        if let Some(child) = &self.child {
            let pid = child.id() as i32;
            // try_wait above guarantees the pid is still ours to signal
            if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
                warn!(pid, "failed to deliver SIGTERM");
            }
        }
    }

    fn kill(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotRunning,
    Starting,
    Running,
    Stopping,
}

pub struct Supervisor<P: ProcessControl> {
    proc: P,
    state: SupervisorState,
    grace: Duration,
    backoff: Duration,
    last_spawn_attempt: Option<Instant>,
}

impl<P: ProcessControl> Supervisor<P> {
    pub fn new(proc: P, grace: Duration, backoff: Duration) -> Self {
        Self {
            proc,
            state: SupervisorState::NotRunning,
            grace,
            backoff,
            last_spawn_attempt: None,
        }
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    /// Drive the state machine with the latest connectivity answer.
    /// Steady states cost one liveness poll at most.
    pub async fn reconcile(&mut self, online: bool) {
        if online {
            self.ensure_running();
        } else {
            self.ensure_stopped().await;
        }
    }

    fn ensure_running(&mut self) {
        match self.state {
            SupervisorState::Running => {
                if !self.proc.is_alive() {
                    warn!("broadcaster exited unexpectedly while online");
                    self.state = SupervisorState::NotRunning;
                    self.try_spawn();
                }
            }
            SupervisorState::NotRunning => self.try_spawn(),
            SupervisorState::Starting | SupervisorState::Stopping => {}
        }
    }

    fn try_spawn(&mut self) {
        if let Some(at) = self.last_spawn_attempt {
            if at.elapsed() < self.backoff {
                debug!("within respawn backoff window, not spawning yet");
                return;
            }
        }
        self.last_spawn_attempt = Some(Instant::now());
        self.state = SupervisorState::Starting;
        match self.proc.spawn() {
            Ok(pid) => {
                info!(pid, "broadcaster started");
                self.state = SupervisorState::Running;
            }
            Err(err) => {
                error!(%err, "failed to start broadcaster, will retry");
                self.state = SupervisorState::NotRunning;
            }
        }
    }

    /// Stop the child: SIGTERM, wait up to the grace period, then
    /// SIGKILL. The wait is bounded so a stuck shutdown cannot stall
    /// the poll loop forever.
    pub async fn ensure_stopped(&mut self) {
        if !matches!(
            self.state,
            SupervisorState::Running | SupervisorState::Starting
        ) {
            return;
        }
        self.state = SupervisorState::Stopping;

        if self.proc.is_alive() {
            self.proc.terminate();
            let deadline = Instant::now() + self.grace;
            while self.proc.is_alive() && Instant::now() < deadline {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            if self.proc.is_alive() {
                warn!("broadcaster ignored SIGTERM, force-killing");
                self.proc.kill();
            } else {
                info!("broadcaster stopped");
            }
        }

        self.state = SupervisorState::NotRunning;
        // a fresh Online edge should spawn immediately, not wait out
        // a backoff left over from the previous run
        self.last_spawn_attempt = None;
    }
}

/// Startup reconciliation: kill any unmanaged broadcaster instance left
/// over from a previous monitor. Policy is kill-and-restart — we never
/// adopt a process whose configuration we cannot see.
pub fn kill_stale_agents(agent_name: &str) -> usize {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    let mut killed = 0;
    for p in sys.processes().values() {
        if p.name().to_string_lossy() != agent_name {
            continue;
        }
        info!(pid = p.pid().as_u32(), "killing stale broadcaster instance");
        if p.kill_with(sysinfo::Signal::Term).unwrap_or(false) || p.kill() {
            killed += 1;
        }
    }
    killed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct FakeState {
        spawns: usize,
        terminates: usize,
        kills: usize,
        alive: bool,
        spawn_fails: bool,
        ignores_sigterm: bool,
    }

    #[derive(Clone, Default)]
    struct FakeProcess(Arc<Mutex<FakeState>>);

    impl FakeProcess {
        fn snapshot(&self) -> (usize, usize, usize) {
            let s = self.0.lock().unwrap();
            (s.spawns, s.terminates, s.kills)
        }

        fn set_alive(&self, alive: bool) {
            self.0.lock().unwrap().alive = alive;
        }
    }

    impl ProcessControl for FakeProcess {
        fn spawn(&mut self) -> std::io::Result<u32> {
            let mut s = self.0.lock().unwrap();
            s.spawns += 1;
            if s.spawn_fails {
                return Err(std::io::Error::other("spawn refused"));
            }
            s.alive = true;
            Ok(4242)
        }

        fn is_alive(&mut self) -> bool {
            self.0.lock().unwrap().alive
        }

        fn terminate(&mut self) {
            let mut s = self.0.lock().unwrap();
            s.terminates += 1;
            if !s.ignores_sigterm {
                s.alive = false;
            }
        }

        fn kill(&mut self) {
            let mut s = self.0.lock().unwrap();
            s.kills += 1;
            s.alive = false;
        }
    }

    fn supervisor(proc: FakeProcess) -> Supervisor<FakeProcess> {
        Supervisor::new(proc, Duration::from_millis(300), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn online_edge_spawns_exactly_once() {
        let fake = FakeProcess::default();
        let mut sup = supervisor(fake.clone());
        assert_eq!(sup.state(), SupervisorState::NotRunning);

        sup.reconcile(false).await;
        assert_eq!(sup.state(), SupervisorState::NotRunning);

        sup.reconcile(true).await;
        assert_eq!(sup.state(), SupervisorState::Running);
        assert_eq!(fake.snapshot().0, 1);
    }

    #[tokio::test]
    async fn repeated_online_polls_are_idempotent() {
        let fake = FakeProcess::default();
        let mut sup = supervisor(fake.clone());

        for _ in 0..5 {
            sup.reconcile(true).await;
        }
        assert_eq!(fake.snapshot().0, 1, "steady Online must not respawn");
        assert_eq!(sup.state(), SupervisorState::Running);
    }

    #[tokio::test]
    async fn crash_while_online_restarts_within_backoff_not_a_storm() {
        let fake = FakeProcess::default();
        let mut sup = supervisor(fake.clone());

        sup.reconcile(true).await;
        assert_eq!(fake.snapshot().0, 1);

        // the process dies behind our back
        fake.set_alive(false);

        // immediate polls are inside the backoff window: detected, but
        // no restart storm
        sup.reconcile(true).await;
        sup.reconcile(true).await;
        assert_eq!(fake.snapshot().0, 1);
        assert_eq!(sup.state(), SupervisorState::NotRunning);

        tokio::time::sleep(Duration::from_millis(250)).await;
        sup.reconcile(true).await;
        assert_eq!(fake.snapshot().0, 2, "exactly one restart after backoff");
        assert_eq!(sup.state(), SupervisorState::Running);
    }

    #[tokio::test]
    async fn offline_edge_stops_gracefully() {
        let fake = FakeProcess::default();
        let mut sup = supervisor(fake.clone());

        sup.reconcile(true).await;
        sup.reconcile(false).await;

        let (spawns, terminates, kills) = fake.snapshot();
        assert_eq!((spawns, terminates, kills), (1, 1, 0));
        assert_eq!(sup.state(), SupervisorState::NotRunning);
    }

    #[tokio::test]
    async fn stuck_shutdown_is_force_killed_after_grace() {
        let fake = FakeProcess::default();
        fake.0.lock().unwrap().ignores_sigterm = true;
        let mut sup = supervisor(fake.clone());

        sup.reconcile(true).await;
        sup.reconcile(false).await;

        let (_, terminates, kills) = fake.snapshot();
        assert_eq!(terminates, 1);
        assert_eq!(kills, 1, "grace period expiry must force-kill");
        assert_eq!(sup.state(), SupervisorState::NotRunning);
    }

    #[tokio::test]
    async fn spawn_failure_retries_on_later_poll() {
        let fake = FakeProcess::default();
        fake.0.lock().unwrap().spawn_fails = true;
        let mut sup = supervisor(fake.clone());

        sup.reconcile(true).await;
        assert_eq!(sup.state(), SupervisorState::NotRunning);

        // still failing, but rate-limited by the backoff window
        sup.reconcile(true).await;
        assert_eq!(fake.snapshot().0, 1);

        fake.0.lock().unwrap().spawn_fails = false;
        tokio::time::sleep(Duration::from_millis(250)).await;
        sup.reconcile(true).await;
        assert_eq!(sup.state(), SupervisorState::Running);
        assert_eq!(fake.snapshot().0, 2);
    }

    #[tokio::test]
    async fn offline_to_online_cycle_spawns_fresh_without_backoff() {
        let fake = FakeProcess::default();
        let mut sup = supervisor(fake.clone());

        sup.reconcile(true).await;
        sup.reconcile(false).await;
        // new Online edge right away: previous run's backoff must not apply
        sup.reconcile(true).await;

        assert_eq!(fake.snapshot().0, 2);
        assert_eq!(sup.state(), SupervisorState::Running);
    }
}
