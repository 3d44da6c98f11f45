//! The reparse state machine.
//!
//! [`Orchestrator::handle`] takes one [`EngineEvent`] and returns the
//! [`Effect`]s the driver has to carry out. It owns no timers, tasks or I/O,
//! so every transition can be exercised synchronously.
//!
//! One cycle runs the reader and, when needed, the scanner concurrently.
//! Both must report back before the cycle extracts. Every job carries the
//! version of the cycle that started it; completions from an older cycle
//! are dropped.

use std::time::{Duration, Instant};

use cms_core::{ReaderState, ReparseConfig, ReparseFlags};
use cms_reader::ParseRequest;
use cms_watcher::{Throttle, ThrottleDecision};
use tracing::{debug, trace, warn};

/// Facts about the build directory the flag adjustment depends on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleFacts {
    /// `CMakeCache.txt` exists.
    pub cache_exists: bool,
    /// The configuration model holds a delta for the tool.
    pub has_delta: bool,
    /// The tool may be re-run without the user asking.
    pub auto_run: bool,
}

/// Input of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// The host asked for a parse.
    Parse(ReparseFlags),
    /// A watched directory listing changed.
    WatchTriggered(Instant),
    /// The throttle timer fired.
    ThrottleElapsed(Instant),
    /// The reparse delay timer of the given generation fired.
    DelayElapsed(u64),
    /// A scan job finished.
    ScanDone {
        /// Cycle the job belongs to.
        version: u64,
        /// Whether the scan produced a file list.
        ok: bool,
    },
    /// A reader job finished.
    ToolDone {
        /// Cycle the job belongs to.
        version: u64,
        /// Whether the parse succeeded.
        ok: bool,
        /// Whether the failure stops automatic retries.
        fatal: bool,
    },
    /// A reply newer than the last consumed one appeared.
    Dirty,
    /// The kit or the build environment changed.
    EnvironmentChanged,
    /// The build directory parameters changed.
    ParametersChanged {
        /// Whether the reader could keep its state.
        compatible: bool,
    },
    /// The host stopped the engine.
    Stop,
}

/// Work the driver has to carry out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// The state changed.
    State(ReaderState),
    /// Tell the host a cycle started.
    ConfigurationStarted,
    /// Start a scan job.
    StartScan {
        /// Cycle version to stamp the job with.
        version: u64,
    },
    /// Start a reader job.
    StartParse {
        /// Cycle version to stamp the job with.
        version: u64,
        /// Force flags for the reader.
        request: ParseRequest,
    },
    /// Fire [`EngineEvent::DelayElapsed`] after `after`.
    ArmDelay {
        /// Generation to report back.
        generation: u64,
        /// Delay.
        after: Duration,
    },
    /// Fire [`EngineEvent::ThrottleElapsed`] at the instant.
    ArmThrottle(Instant),
    /// Merge the finished cycle's results and publish them.
    Extract {
        /// The finished cycle.
        version: u64,
    },
    /// Tell the host the build directory changed behind its back.
    EmitDirty,
    /// Cancel the scan and kill the tool.
    Cancel,
}

#[derive(Debug, Clone, Copy)]
struct Cycle {
    version: u64,
    scanning: bool,
    configuring: bool,
    tool_ok: bool,
    fatal: bool,
}

/// The reparse state machine of one build configuration.
///
/// # Examples
///
/// ```
/// use cms_core::{ReaderState, ReparseConfig, ReparseFlags};
/// use cms_engine::{Effect, EngineEvent, Orchestrator};
///
/// let mut orchestrator = Orchestrator::new(&ReparseConfig::default());
/// let effects = orchestrator.handle(EngineEvent::Parse(ReparseFlags::URGENT));
/// assert!(effects.contains(&Effect::State(ReaderState::Configuring)));
/// assert!(orchestrator.is_busy());
/// ```
#[derive(Debug, Clone)]
pub struct Orchestrator {
    state: ReaderState,
    facts: CycleFacts,
    version: u64,
    cycle: Option<Cycle>,
    pending: Option<ReparseFlags>,
    follow_up: Option<ReparseFlags>,
    throttle: Throttle,
    delay: Duration,
    delay_generation: u64,
    has_scan: bool,
    retries_disabled: bool,
}

impl Orchestrator {
    /// Creates an idle orchestrator.
    #[must_use]
    pub fn new(config: &ReparseConfig) -> Self {
        Self {
            state: ReaderState::Idle,
            facts: CycleFacts::default(),
            version: 0,
            cycle: None,
            pending: None,
            follow_up: None,
            throttle: Throttle::new(config.throttle_window()),
            delay: config.reparse_delay(),
            delay_generation: 0,
            has_scan: false,
            retries_disabled: false,
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> ReaderState {
        self.state
    }

    /// Returns the version of the newest cycle.
    #[inline]
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Returns `true` while a cycle is in flight.
    #[inline]
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.cycle.is_some()
    }

    /// Returns the flags queued for after the running cycle.
    #[inline]
    #[must_use]
    pub const fn follow_up(&self) -> Option<ReparseFlags> {
        self.follow_up
    }

    /// Returns `true` after a fatal failure until parameters or environment
    /// change.
    #[inline]
    #[must_use]
    pub const fn retries_disabled(&self) -> bool {
        self.retries_disabled
    }

    /// Updates the build-directory facts used when a cycle is dispatched.
    pub fn set_facts(&mut self, facts: CycleFacts) {
        self.facts = facts;
    }

    /// Adjusts requested flags to the current facts.
    #[must_use]
    pub fn adjust_flags(&self, flags: ReparseFlags) -> ReparseFlags {
        let mut flags = flags.without(ReparseFlags::URGENT);
        if !self.facts.cache_exists {
            flags.insert(ReparseFlags::FORCE_INITIAL_CONFIG | ReparseFlags::FORCE_TOOL_RUN);
        }
        if self.facts.has_delta {
            flags.insert(ReparseFlags::FORCE_TOOL_RUN | ReparseFlags::FORCE_EXTRA_CONFIG);
        }
        if flags.contains(ReparseFlags::FORCE_INITIAL_CONFIG) {
            flags.remove(ReparseFlags::FORCE_EXTRA_CONFIG);
        }
        if !self.has_scan {
            flags.insert(ReparseFlags::FORCE_SCAN);
        }
        flags
    }

    /// Handles one event.
    pub fn handle(&mut self, event: EngineEvent) -> Vec<Effect> {
        trace!(?event, state = %self.state, "Orchestrator event");
        let mut effects = Vec::new();
        match event {
            EngineEvent::Parse(flags) => self.request(flags, &mut effects),
            EngineEvent::WatchTriggered(now) => {
                if self.retries_disabled {
                    debug!("Ignoring change, automatic reparse disabled");
                } else if let ThrottleDecision::Scheduled(at) = self.throttle.trigger(now) {
                    effects.push(Effect::ArmThrottle(at));
                }
            }
            EngineEvent::ThrottleElapsed(now) => {
                if self.throttle.poll(now) {
                    self.request(ReparseFlags::URGENT | ReparseFlags::FORCE_SCAN, &mut effects);
                }
            }
            EngineEvent::DelayElapsed(generation) => {
                if generation == self.delay_generation && self.cycle.is_none() {
                    if let Some(flags) = self.pending.take() {
                        self.dispatch(flags, &mut effects);
                    }
                }
            }
            EngineEvent::ScanDone { version, ok } => self.scan_done(version, ok, &mut effects),
            EngineEvent::ToolDone { version, ok, fatal } => {
                self.tool_done(version, ok, fatal, &mut effects);
            }
            EngineEvent::Dirty => {
                effects.push(Effect::EmitDirty);
                if self.facts.auto_run && !self.retries_disabled {
                    self.request(ReparseFlags::DEFAULT, &mut effects);
                }
            }
            EngineEvent::EnvironmentChanged => {
                self.retries_disabled = false;
                self.request(ReparseFlags::URGENT | ReparseFlags::FORCE_TOOL_RUN, &mut effects);
            }
            EngineEvent::ParametersChanged { compatible } => {
                self.retries_disabled = false;
                let flags = if compatible {
                    ReparseFlags::DEFAULT
                } else {
                    self.has_scan = false;
                    ReparseFlags::URGENT | ReparseFlags::FORCE_SCAN
                };
                self.request(flags, &mut effects);
            }
            EngineEvent::Stop => self.stop(&mut effects),
        }
        effects
    }

    fn set_state(&mut self, next: ReaderState, effects: &mut Vec<Effect>) {
        if self.state == next {
            return;
        }
        if !self.state.can_transition_to(next) {
            warn!(from = %self.state, to = %next, "Unexpected state transition");
        }
        self.state = next;
        effects.push(Effect::State(next));
    }

    fn request(&mut self, flags: ReparseFlags, effects: &mut Vec<Effect>) {
        if self.cycle.is_some() {
            let queued = self.follow_up.unwrap_or_default() | flags.without(ReparseFlags::URGENT);
            debug!(flags = queued.bits(), "Cycle in flight, queueing follow-up");
            self.follow_up = Some(queued);
            return;
        }
        let pending = self.pending.unwrap_or_default() | flags;
        if flags.contains(ReparseFlags::URGENT) {
            self.pending = None;
            self.dispatch(pending, effects);
        } else {
            self.pending = Some(pending);
            self.delay_generation += 1;
            effects.push(Effect::ArmDelay {
                generation: self.delay_generation,
                after: self.delay,
            });
        }
    }

    fn dispatch(&mut self, flags: ReparseFlags, effects: &mut Vec<Effect>) {
        let flags = self.adjust_flags(flags);
        self.version += 1;
        let scanning = flags.contains(ReparseFlags::FORCE_SCAN);
        self.cycle = Some(Cycle {
            version: self.version,
            scanning,
            configuring: true,
            tool_ok: false,
            fatal: false,
        });
        debug!(version = self.version, flags = flags.bits(), "Starting cycle");

        effects.push(Effect::ConfigurationStarted);
        self.set_state(ReaderState::Configuring, effects);
        effects.push(Effect::StartParse {
            version: self.version,
            request: ParseRequest::from_flags(flags),
        });
        if scanning {
            effects.push(Effect::StartScan {
                version: self.version,
            });
        }
    }

    fn current(&mut self, version: u64, job: &str) -> Option<&mut Cycle> {
        match &mut self.cycle {
            Some(cycle) if cycle.version == version => Some(cycle),
            _ => {
                debug!(version, job, "Discarding stale completion");
                None
            }
        }
    }

    fn scan_done(&mut self, version: u64, ok: bool, effects: &mut Vec<Effect>) {
        let Some(cycle) = self.current(version, "scan") else {
            return;
        };
        cycle.scanning = false;
        let finished = !cycle.configuring;
        if ok {
            self.has_scan = true;
        }
        if finished {
            self.finish(effects);
        }
    }

    fn tool_done(&mut self, version: u64, ok: bool, fatal: bool, effects: &mut Vec<Effect>) {
        let Some(cycle) = self.current(version, "parse") else {
            return;
        };
        cycle.configuring = false;
        cycle.tool_ok = ok;
        cycle.fatal = fatal;
        if cycle.scanning {
            self.set_state(ReaderState::Scanning, effects);
        } else {
            self.finish(effects);
        }
    }

    fn finish(&mut self, effects: &mut Vec<Effect>) {
        let Some(cycle) = self.cycle.take() else {
            return;
        };
        self.set_state(ReaderState::Extracting, effects);
        effects.push(Effect::Extract {
            version: cycle.version,
        });
        let outcome = if cycle.tool_ok {
            ReaderState::Ready
        } else {
            ReaderState::Error
        };
        self.set_state(outcome, effects);
        if cycle.fatal {
            warn!("Tool unavailable, automatic reparse disabled");
            self.retries_disabled = true;
            self.follow_up = None;
        }
        self.set_state(ReaderState::Idle, effects);

        if let Some(flags) = self.follow_up.take() {
            debug!(flags = flags.bits(), "Dispatching follow-up");
            self.dispatch(flags, effects);
        }
    }

    fn stop(&mut self, effects: &mut Vec<Effect>) {
        if self.cycle.take().is_some() {
            effects.push(Effect::Cancel);
        }
        self.pending = None;
        self.follow_up = None;
        self.throttle.cancel();
        self.delay_generation += 1;
        self.set_state(ReaderState::Idle, effects);
    }
}
