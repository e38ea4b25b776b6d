use crate::config::ConfigStore;
use crate::foreground::ForegroundResolver;
use crate::jobs::{JobRunner, SubmitOutcome, SubmitPolicy};
use crate::power::{InteractiveStatus, PowerSource};
use crate::report::{SendOutcome, StatusReport, StatusReporter};
use crate::scheduler::{CadenceConfig, PresenceMode, ReportCadence, TickAction};
use anyhow::Result;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};

/// Logical name of the report job. One name means one in-flight report,
/// whatever triggered it.
pub const REPORT_JOB: &str = "status-report";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentCommand {
    /// Delivered by the screen watcher on every power-state transition.
    ScreenStateChanged { interactive: bool },
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    Started,
    ModeChanged {
        mode: PresenceMode,
    },
    ReportDispatched {
        expedited: bool,
    },
    /// A cadence dispatch superseded one that was still queued.
    ReportSuperseded,
    /// An expedited dispatch was dropped because a report was in flight.
    ReportDropped,
    /// The tick ran but there was nothing to send to.
    ReportSkipped {
        reason: String,
    },
    ReportFinished {
        expedited: bool,
        outcome: SendOutcome,
    },
    /// The usage source became unreachable (or recovered); reports carry
    /// the cached label while degraded.
    ResolverDegraded {
        degraded: bool,
    },
    Stopped,
    Completed {
        summary: AgentSummary,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AgentSummary {
    pub ticks: u64,
    pub cadence_dispatches: u64,
    pub expedited_dispatches: u64,
    pub dropped_expedited: u64,
    pub mode_changes: u64,
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub cadence: CadenceConfig,
    /// Stop after this long; `None` runs until a Stop command.
    pub run_for: Option<Duration>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            cadence: CadenceConfig::default(),
            run_for: None,
        }
    }
}

pub struct PresenceAgent {
    store: ConfigStore,
    reporter: StatusReporter,
    resolver: Arc<Mutex<ForegroundResolver>>,
    power: Arc<dyn PowerSource>,
    jobs: Arc<JobRunner>,
    degraded: Arc<AtomicBool>,
}

impl PresenceAgent {
    pub fn new(
        store: ConfigStore,
        reporter: StatusReporter,
        resolver: ForegroundResolver,
        power: Arc<dyn PowerSource>,
    ) -> Self {
        Self {
            store,
            reporter,
            resolver: Arc::new(Mutex::new(resolver)),
            power,
            jobs: JobRunner::new(),
            degraded: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Resolve and send one report right now, outside any scheduling.
    pub async fn report_once(&self) -> Result<SendOutcome> {
        let config = self.store.load()?;
        let screen_on = self.power.interactive_status().as_screen_on();
        let app_label = self.resolver.lock().await.resolve().await;
        let report = StatusReport::new(&config, screen_on, app_label);
        Ok(self.reporter.send(&config, &report).await)
    }

    /// Drive the presence cadence until `Stop` arrives (or `run_for`
    /// elapses). Screen events and the tick deadline funnel through this
    /// single loop, so mode state needs no locking; report jobs run on the
    /// job runner so a slow send never delays wake detection.
    pub async fn run(
        &self,
        settings: AgentSettings,
        mut command_rx: Option<mpsc::UnboundedReceiver<AgentCommand>>,
        event_tx: Option<mpsc::UnboundedSender<AgentEvent>>,
    ) -> Result<AgentSummary> {
        let mut cadence = ReportCadence::new(settings.cadence).map_err(anyhow::Error::msg)?;
        let start = tokio::time::Instant::now();
        let mut summary = AgentSummary::default();

        send_event(&event_tx, AgentEvent::Started);

        loop {
            let elapsed = start.elapsed();

            if let Some(run_for) = settings.run_for
                && elapsed >= run_for
            {
                send_event(&event_tx, AgentEvent::Completed { summary });
                return Ok(summary);
            }

            if cadence.is_due(elapsed) {
                summary.ticks += 1;
                match cadence.on_tick(elapsed) {
                    TickAction::Report => {
                        self.dispatch(false, &mut summary, &event_tx);
                    }
                    TickAction::PollOnly => {
                        // The event stream can miss a wake (or be absent
                        // entirely); the sleeping poll is the backstop.
                        if self.power.interactive_status() == InteractiveStatus::Interactive {
                            self.apply_screen_event(
                                true,
                                start.elapsed(),
                                &mut cadence,
                                &mut summary,
                                &event_tx,
                            );
                        }
                    }
                }
                continue;
            }

            let mut delay = cadence.time_until_due(elapsed);
            if let Some(run_for) = settings.run_for {
                delay = delay.min(run_for.saturating_sub(elapsed));
            }

            if let Some(rx) = command_rx.as_mut() {
                tokio::select! {
                    command = rx.recv() => match command {
                        Some(AgentCommand::ScreenStateChanged { interactive }) => {
                            self.apply_screen_event(
                                interactive,
                                start.elapsed(),
                                &mut cadence,
                                &mut summary,
                                &event_tx,
                            );
                        }
                        Some(AgentCommand::Stop) => {
                            send_event(&event_tx, AgentEvent::Stopped);
                            send_event(&event_tx, AgentEvent::Completed { summary });
                            return Ok(summary);
                        }
                        None => {
                            // Watcher gone: degrade to fixed cadence.
                            command_rx = None;
                        }
                    },
                    _ = tokio::time::sleep(delay) => {}
                }
            } else {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// The mode transition is applied before the expedited job is
    /// submitted, so a wake report can only observe post-transition state.
    fn apply_screen_event(
        &self,
        interactive: bool,
        elapsed: Duration,
        cadence: &mut ReportCadence,
        summary: &mut AgentSummary,
        event_tx: &Option<mpsc::UnboundedSender<AgentEvent>>,
    ) {
        let previous = cadence.mode();
        let expedite = cadence.on_screen_event(interactive, elapsed);
        if cadence.mode() != previous {
            summary.mode_changes += 1;
            send_event(
                event_tx,
                AgentEvent::ModeChanged {
                    mode: cadence.mode(),
                },
            );
        }
        if expedite {
            self.dispatch(true, summary, event_tx);
        }
    }

    fn dispatch(
        &self,
        expedited: bool,
        summary: &mut AgentSummary,
        event_tx: &Option<mpsc::UnboundedSender<AgentEvent>>,
    ) {
        let policy = if expedited {
            SubmitPolicy::KeepIfRunning
        } else {
            SubmitPolicy::ReplacePending
        };

        let store = self.store.clone();
        let reporter = self.reporter.clone();
        let resolver = Arc::clone(&self.resolver);
        let power = Arc::clone(&self.power);
        let degraded = Arc::clone(&self.degraded);
        let job_events = event_tx.clone();

        let outcome = self.jobs.submit(REPORT_JOB, policy, async move {
            let config = match store.load() {
                Ok(config) => config,
                Err(err) => {
                    send_event(
                        &job_events,
                        AgentEvent::ReportSkipped {
                            reason: format!("{err:#}"),
                        },
                    );
                    return;
                }
            };

            let missing = config.missing_fields();
            if !missing.is_empty() {
                send_event(
                    &job_events,
                    AgentEvent::ReportSkipped {
                        reason: format!("config missing: {}", missing.join(", ")),
                    },
                );
                return;
            }

            // Screen state is read here, at execution time, after any mode
            // transition that triggered this job.
            let screen_on = power.interactive_status().as_screen_on();
            let app_label = {
                let mut resolver = resolver.lock().await;
                let label = resolver.resolve().await;
                let now_degraded = resolver.is_degraded();
                if degraded.swap(now_degraded, Ordering::SeqCst) != now_degraded {
                    send_event(
                        &job_events,
                        AgentEvent::ResolverDegraded {
                            degraded: now_degraded,
                        },
                    );
                }
                label
            };

            let report = StatusReport::new(&config, screen_on, app_label);
            let outcome = reporter.send(&config, &report).await;
            send_event(&job_events, AgentEvent::ReportFinished { expedited, outcome });
        });

        match outcome {
            SubmitOutcome::Queued => {
                if expedited {
                    summary.expedited_dispatches += 1;
                } else {
                    summary.cadence_dispatches += 1;
                }
                send_event(event_tx, AgentEvent::ReportDispatched { expedited });
            }
            SubmitOutcome::ReplacedPending => {
                summary.cadence_dispatches += 1;
                send_event(event_tx, AgentEvent::ReportSuperseded);
                send_event(event_tx, AgentEvent::ReportDispatched { expedited });
            }
            SubmitOutcome::Dropped => {
                summary.dropped_expedited += 1;
                send_event(event_tx, AgentEvent::ReportDropped);
            }
        }
    }
}

fn send_event(event_tx: &Option<mpsc::UnboundedSender<AgentEvent>>, event: AgentEvent) {
    if let Some(tx) = event_tx {
        let _ = tx.send(event);
    }
}
