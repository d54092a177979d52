//! Live replay sessions.
//!
//! A session is a spawned task that emits [`ReplayFrame`]s over a bounded
//! channel and listens for [`ReplayControl`]s. The wait between two entries
//! is tracked in *log time*: every slice of wall-clock time spent waiting
//! consumes `elapsed * speed` of the remaining gap, so a speed change
//! rescales only what is left and a pause keeps the position.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::{ReplayConfig, ReplayError};
use crate::store::LogEntry;
use crate::task::TaskId;

const FRAME_BUFFER: usize = 32;
const CONTROL_BUFFER: usize = 16;

/// A message emitted by a live replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReplayFrame {
    ReplayStart {
        task_id: TaskId,
        total: usize,
        speed: f64,
    },
    ReplayEvent {
        entry: LogEntry,
        index: usize,
        total: usize,
    },
    ReplayComplete {
        task_id: TaskId,
    },
}

/// A control message for a live replay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReplayControl {
    Pause,
    Resume,
    SetSpeed(f64),
}

/// Sends controls to a running session.
#[derive(Debug, Clone)]
pub struct ReplayController {
    tx: mpsc::Sender<ReplayControl>,
    config: ReplayConfig,
}

impl ReplayController {
    pub async fn pause(&self) -> Result<(), ReplayError> {
        self.send(ReplayControl::Pause).await
    }

    pub async fn resume(&self) -> Result<(), ReplayError> {
        self.send(ReplayControl::Resume).await
    }

    pub async fn set_speed(&self, speed: f64) -> Result<(), ReplayError> {
        let speed = self.config.validate_speed(speed)?;
        self.send(ReplayControl::SetSpeed(speed)).await
    }

    async fn send(&self, control: ReplayControl) -> Result<(), ReplayError> {
        self.tx
            .send(control)
            .await
            .map_err(|_| ReplayError::Finished)
    }
}

/// Handle to a live replay. Dropping it stops the replay.
pub struct ReplaySession {
    frames: mpsc::Receiver<ReplayFrame>,
    controller: ReplayController,
    task: JoinHandle<()>,
}

impl ReplaySession {
    /// Spawn a replay of `logs` (already in sequence order).
    pub fn start(task_id: TaskId, logs: Vec<LogEntry>, speed: f64, config: &ReplayConfig) -> Self {
        let (frames_tx, frames) = mpsc::channel(FRAME_BUFFER);
        let (controls_tx, controls_rx) = mpsc::channel(CONTROL_BUFFER);

        let player = Player {
            task_id,
            logs,
            speed,
            max_delay: config.max_delay,
            paused: false,
            controls: controls_rx,
            controls_open: true,
            frames: frames_tx,
        };
        let task = tokio::spawn(player.run());

        Self {
            frames,
            controller: ReplayController {
                tx: controls_tx,
                config: config.clone(),
            },
            task,
        }
    }

    /// Next frame, or `None` after `replay_complete`.
    pub async fn next_frame(&mut self) -> Option<ReplayFrame> {
        self.frames.recv().await
    }

    pub fn controller(&self) -> ReplayController {
        self.controller.clone()
    }
}

impl Drop for ReplaySession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// `duration * factor`, saturating instead of panicking on overflow.
fn scale(duration: Duration, factor: f64) -> Duration {
    Duration::try_from_secs_f64(duration.as_secs_f64() * factor).unwrap_or(Duration::MAX)
}

struct Player {
    task_id: TaskId,
    logs: Vec<LogEntry>,
    speed: f64,
    max_delay: Option<Duration>,
    paused: bool,
    controls: mpsc::Receiver<ReplayControl>,
    controls_open: bool,
    frames: mpsc::Sender<ReplayFrame>,
}

impl Player {
    async fn run(mut self) {
        let total = self.logs.len();
        let start = ReplayFrame::ReplayStart {
            task_id: self.task_id,
            total,
            speed: self.speed,
        };
        if self.frames.send(start).await.is_err() {
            return;
        }

        let logs = std::mem::take(&mut self.logs);
        let mut previous: Option<&LogEntry> = None;
        for (index, entry) in logs.iter().enumerate() {
            let gap = previous
                .map(|p| (entry.timestamp - p.timestamp).to_std().unwrap_or_default())
                .unwrap_or_default();
            self.wait(gap).await;

            let frame = ReplayFrame::ReplayEvent {
                entry: entry.clone(),
                index,
                total,
            };
            if self.frames.send(frame).await.is_err() {
                return;
            }
            previous = Some(entry);
        }

        let _ = self
            .frames
            .send(ReplayFrame::ReplayComplete {
                task_id: self.task_id,
            })
            .await;
    }

    fn apply(&mut self, control: Option<ReplayControl>) {
        match control {
            Some(ReplayControl::Pause) => self.paused = true,
            Some(ReplayControl::Resume) => self.paused = false,
            Some(ReplayControl::SetSpeed(speed)) => self.speed = speed,
            None => {
                // Nobody can resume us any more.
                self.controls_open = false;
                self.paused = false;
            }
        }
    }

    /// Wait out `gap` of log time, honouring controls as they arrive.
    async fn wait(&mut self, gap: Duration) {
        let mut remaining = gap;
        let mut budget = self.max_delay;

        loop {
            while self.controls_open {
                match self.controls.try_recv() {
                    Ok(control) => self.apply(Some(control)),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => self.apply(None),
                }
            }

            if self.paused {
                let control = self.controls.recv().await;
                self.apply(control);
                continue;
            }

            let mut wait = scale(remaining, 1.0 / self.speed);
            if let Some(budget) = budget {
                wait = wait.min(budget);
            }
            if wait.is_zero() {
                return;
            }

            let started = Instant::now();
            tokio::select! {
                _ = tokio::time::sleep(wait) => return,
                control = self.controls.recv(), if self.controls_open => {
                    let elapsed = started.elapsed();
                    remaining = remaining.saturating_sub(scale(elapsed, self.speed));
                    budget = budget.map(|b| b.saturating_sub(elapsed));
                    self.apply(control);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::replay::tests::entries;

    async fn collect(session: &mut ReplaySession) -> Vec<ReplayFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = session.next_frame().await {
            let done = matches!(frame, ReplayFrame::ReplayComplete { .. });
            frames.push(frame);
            if done {
                break;
            }
        }
        frames
    }

    fn indices(frames: &[ReplayFrame]) -> Vec<usize> {
        frames
            .iter()
            .filter_map(|f| match f {
                ReplayFrame::ReplayEvent { index, .. } => Some(*index),
                _ => None,
            })
            .collect()
    }

    fn approx(actual: Duration, expected_ms: u64) -> bool {
        let expected = Duration::from_millis(expected_ms);
        let slack = Duration::from_millis(20);
        actual + slack >= expected && actual <= expected + slack
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_start_events_complete() {
        let logs = entries(&[0, 500, 1_500]);
        let task_id = logs[0].task_id;
        let mut session = ReplaySession::start(task_id, logs, 1.0, &ReplayConfig::default());

        let frames = collect(&mut session).await;
        assert_eq!(
            frames[0],
            ReplayFrame::ReplayStart {
                task_id,
                total: 3,
                speed: 1.0
            }
        );
        assert_eq!(indices(&frames), vec![0, 1, 2]);
        assert_eq!(frames.last(), Some(&ReplayFrame::ReplayComplete { task_id }));
        assert!(session.next_frame().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_speed_takes_half_the_time() {
        let logs = entries(&[0, 1_000, 3_000]);
        let task_id = logs[0].task_id;

        let started = Instant::now();
        let mut normal = ReplaySession::start(task_id, logs.clone(), 1.0, &ReplayConfig::default());
        collect(&mut normal).await;
        let at_one = started.elapsed();

        let started = Instant::now();
        let mut fast = ReplaySession::start(task_id, logs, 2.0, &ReplayConfig::default());
        collect(&mut fast).await;
        let at_two = started.elapsed();

        assert!(approx(at_one, 3_000), "speed 1 took {:?}", at_one);
        assert!(approx(at_two, 1_500), "speed 2 took {:?}", at_two);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_lose_nothing() {
        let logs = entries(&[0, 1_000, 2_000, 3_000]);
        let task_id = logs[0].task_id;
        let mut session = ReplaySession::start(task_id, logs, 1.0, &ReplayConfig::default());
        let controller = session.controller();

        // start + first event arrive immediately
        assert!(matches!(
            session.next_frame().await,
            Some(ReplayFrame::ReplayStart { .. })
        ));
        assert!(matches!(
            session.next_frame().await,
            Some(ReplayFrame::ReplayEvent { index: 0, .. })
        ));

        let started = Instant::now();
        tokio::time::sleep(Duration::from_millis(400)).await;
        controller.pause().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(session.frames.try_recv().is_err());
        controller.resume().await.unwrap();

        let rest = collect(&mut session).await;
        assert_eq!(indices(&rest), vec![1, 2, 3]);
        // 3s of log time plus the 10s pause
        assert!(approx(started.elapsed(), 13_000), "took {:?}", started.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_change_rescales_remaining_gap() {
        let logs = entries(&[0, 4_000]);
        let task_id = logs[0].task_id;
        let mut session = ReplaySession::start(task_id, logs, 1.0, &ReplayConfig::default());
        let controller = session.controller();
        session.next_frame().await;
        session.next_frame().await;

        let started = Instant::now();
        tokio::time::sleep(Duration::from_secs(1)).await;
        controller.set_speed(3.0).await.unwrap();

        let rest = collect(&mut session).await;
        assert_eq!(indices(&rest), vec![1]);
        // 1s at speed 1, then the remaining 3s of log time at speed 3
        assert!(approx(started.elapsed(), 2_000), "took {:?}", started.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_delay_caps_each_gap() {
        let logs = entries(&[0, 10_000, 11_000]);
        let task_id = logs[0].task_id;
        let config = ReplayConfig {
            max_delay: Some(Duration::from_secs(2)),
            ..ReplayConfig::default()
        };

        let started = Instant::now();
        let mut session = ReplaySession::start(task_id, logs, 1.0, &config);
        collect(&mut session).await;
        assert!(approx(started.elapsed(), 3_000), "took {:?}", started.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiny_speed_keeps_the_player_alive() {
        let logs = entries(&[0, 1_000]);
        let task_id = logs[0].task_id;
        let mut session = ReplaySession::start(task_id, logs, 1e-20, &ReplayConfig::default());
        let controller = session.controller();
        session.next_frame().await;
        assert!(matches!(
            session.next_frame().await,
            Some(ReplayFrame::ReplayEvent { index: 0, .. })
        ));

        let started = Instant::now();
        controller.set_speed(1.0).await.unwrap();
        let rest = collect(&mut session).await;
        assert_eq!(indices(&rest), vec![1]);
        assert_eq!(rest.last(), Some(&ReplayFrame::ReplayComplete { task_id }));
        assert!(approx(started.elapsed(), 1_000), "took {:?}", started.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiny_speed_is_still_capped_by_max_delay() {
        let logs = entries(&[0, 1_000]);
        let task_id = logs[0].task_id;
        let config = ReplayConfig {
            max_delay: Some(Duration::from_secs(2)),
            ..ReplayConfig::default()
        };

        let started = Instant::now();
        let mut session = ReplaySession::start(task_id, logs, 1e-20, &config);
        let frames = collect(&mut session).await;
        assert_eq!(indices(&frames), vec![0, 1]);
        assert!(approx(started.elapsed(), 2_000), "took {:?}", started.elapsed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_speed_is_rejected_and_finished_session_reports() {
        let logs = entries(&[0]);
        let task_id = logs[0].task_id;
        let mut session = ReplaySession::start(task_id, logs, 1.0, &ReplayConfig::default());
        let controller = session.controller();

        assert!(matches!(
            controller.set_speed(50.0).await,
            Err(ReplayError::InvalidSpeed { .. })
        ));

        collect(&mut session).await;
        drop(session);
        tokio::task::yield_now().await;
        assert_eq!(controller.pause().await, Err(ReplayError::Finished));
    }
}
