//! Capture session state machine.
//!
//! One worker thread owns the camera and printer and drives every session
//! end-to-end: countdown, capture (with gaps for strips), compose, save,
//! print, terminal display, return to Idle. HTTP handlers and the joystick
//! watcher only ever call `start`/`reprint`/`reset_to_idle` and read status
//! snapshots; they never wait on hardware.
//!
//! Policies fixed here:
//! - the countdown runs in full before the first shot only; later strip
//!   shots wait out the gap and capture immediately;
//! - a camera failure mid-strip aborts the whole session;
//! - a printer failure after a successful save ends the session in Error
//!   with the photo filename still published, so the shot stays in the
//!   gallery and can be reprinted.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{Local, Utc};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::camera::FrameSource;
use crate::compose;
use crate::config::SessionConfig;
use crate::error::Error;
use crate::printer::PrintDevice;
use crate::status::{self, SessionMode, StatusPublisher, StatusReader, StatusSnapshot};
use crate::store::{Photo, PhotoStore};

/// Poll interval while holding a terminal result on screen.
const RESULT_POLL: Duration = Duration::from_millis(100);

#[derive(Debug)]
struct CoreState {
    mode: SessionMode,
    generation: u64,
    shots_planned: u32,
    shots_taken: u32,
    target_timestamp: Option<i64>,
    message: String,
    photo_filename: Option<String>,
    /// Set while a reprint borrows the printer between sessions; blocks
    /// `start` just like a live session does.
    printer_busy: bool,
}

impl CoreState {
    fn idle() -> Self {
        let snap = StatusSnapshot::idle();
        Self {
            mode: snap.mode,
            generation: snap.generation,
            shots_planned: snap.shots_planned,
            shots_taken: snap.shots_taken,
            target_timestamp: snap.target_timestamp,
            message: snap.message,
            photo_filename: snap.photo_filename,
            printer_busy: false,
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            mode: self.mode,
            generation: self.generation,
            message: self.message.clone(),
            shots_planned: self.shots_planned,
            shots_taken: self.shots_taken,
            target_timestamp: self.target_timestamp,
            photo_filename: self.photo_filename.clone(),
        }
    }

    fn return_to_idle(&mut self) {
        self.mode = SessionMode::Idle;
        self.shots_planned = 0;
        self.shots_taken = 0;
        self.target_timestamp = None;
        self.message = "Ready to take photos!".to_string();
        self.photo_filename = None;
    }
}

struct Shared {
    state: Mutex<CoreState>,
    publisher: StatusPublisher,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, CoreState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// All publishes happen with the state lock held, so snapshots reach the
    /// channel in transition order.
    fn publish(&self, state: &CoreState) {
        self.publisher.publish(state.snapshot());
    }
}

struct SessionJob {
    generation: u64,
    shots_planned: u32,
    /// Absolute countdown deadline, epoch milliseconds. Fixed at `start` so
    /// every poller derives the same remaining time.
    countdown_target: i64,
    gap: Duration,
}

enum Job {
    Session(SessionJob),
    Reprint {
        filename: String,
        reply: oneshot::Sender<Result<(), Error>>,
    },
}

/// Handle to the booth's single session state machine. Cheap to clone; every
/// trigger source (HTTP, joystick) must go through the same `start` gate.
#[derive(Clone)]
pub struct SessionController {
    shared: Arc<Shared>,
    jobs: mpsc::Sender<Job>,
    reader: StatusReader,
    cfg: SessionConfig,
}

impl SessionController {
    /// Wire up the state machine and spawn the hardware worker thread. The
    /// worker takes exclusive ownership of the camera and printer.
    pub fn spawn(
        cfg: SessionConfig,
        camera: Box<dyn FrameSource>,
        printer: Box<dyn PrintDevice>,
        store: PhotoStore,
        dots_per_line: u32,
        frame_timeout: Duration,
    ) -> Result<Self, Error> {
        let (publisher, reader) = status::channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(CoreState::idle()),
            publisher,
        });
        let (jobs_tx, jobs_rx) = mpsc::channel(2);

        let worker = Worker {
            shared: Arc::clone(&shared),
            jobs_rx,
            camera,
            printer,
            store,
            dots_per_line,
            frame_timeout,
            result_display: cfg.result_display,
        };
        std::thread::Builder::new()
            .name("booth-worker".to_string())
            .spawn(move || worker.run())?;

        Ok(Self {
            shared,
            jobs: jobs_tx,
            reader,
            cfg,
        })
    }

    /// Start a session: gate, bump the generation, enter Countdown, and hand
    /// the job to the worker. Non-blocking; returns the new generation, or
    /// `Busy` while any session (or reprint) is live.
    pub fn start(
        &self,
        shots_planned: u32,
        countdown: Duration,
        gap: Duration,
    ) -> Result<u64, Error> {
        let mut st = self.shared.lock();
        if st.mode.is_live() || st.printer_busy {
            return Err(Error::Busy);
        }

        let countdown_target = Utc::now().timestamp_millis() + countdown.as_millis() as i64;
        st.generation += 1;
        st.mode = SessionMode::Countdown;
        st.shots_planned = shots_planned;
        st.shots_taken = 0;
        st.target_timestamp = Some(countdown_target);
        st.photo_filename = None;
        st.message = if shots_planned > 1 {
            format!("Photo strip mode! {shots_planned} photos coming up")
        } else {
            "Get ready!".to_string()
        };

        let job = Job::Session(SessionJob {
            generation: st.generation,
            shots_planned,
            countdown_target,
            gap,
        });
        if self.jobs.try_send(job).is_err() {
            // Worker backlog despite the gate means the worker is gone.
            st.return_to_idle();
            return Err(Error::Busy);
        }
        self.shared.publish(&st);
        info!(generation = st.generation, shots_planned, "session started");
        Ok(st.generation)
    }

    pub fn start_single(&self) -> Result<u64, Error> {
        self.start(1, self.cfg.countdown, self.cfg.strip_gap)
    }

    pub fn start_strip(&self) -> Result<u64, Error> {
        self.start(self.cfg.strip_shots, self.cfg.countdown, self.cfg.strip_gap)
    }

    /// Re-send a stored photo to the printer. Serializes with sessions on
    /// the same gate since the printer is a singular device.
    pub async fn reprint(&self, filename: &str) -> Result<(), Error> {
        {
            let mut st = self.shared.lock();
            if st.mode.is_live() || st.printer_busy {
                return Err(Error::Busy);
            }
            st.printer_busy = true;
        }

        let (reply, rx) = oneshot::channel();
        let job = Job::Reprint {
            filename: filename.to_string(),
            reply,
        };
        if self.jobs.try_send(job).is_err() {
            self.shared.lock().printer_busy = false;
            return Err(Error::PrinterUnavailable("print worker stopped".to_string()));
        }
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(Error::PrinterUnavailable("print worker stopped".to_string())),
        }
    }

    /// Latest published snapshot; never touches the worker's lock.
    pub fn current_status(&self) -> StatusSnapshot {
        self.reader.current()
    }

    pub fn status_reader(&self) -> StatusReader {
        self.reader.clone()
    }

    /// Dismiss a terminal result. Returns false when the session is not in
    /// a terminal state (the lifecycle never skips a terminal publish).
    pub fn reset_to_idle(&self) -> bool {
        let mut st = self.shared.lock();
        if !st.mode.is_terminal() {
            return false;
        }
        st.return_to_idle();
        self.shared.publish(&st);
        true
    }
}

struct Worker {
    shared: Arc<Shared>,
    jobs_rx: mpsc::Receiver<Job>,
    camera: Box<dyn FrameSource>,
    printer: Box<dyn PrintDevice>,
    store: PhotoStore,
    dots_per_line: u32,
    frame_timeout: Duration,
    result_display: Duration,
}

impl Worker {
    fn run(mut self) {
        while let Some(job) = self.jobs_rx.blocking_recv() {
            match job {
                Job::Session(job) => self.run_session(job),
                Job::Reprint { filename, reply } => {
                    let result = self.run_reprint(&filename);
                    self.shared.lock().printer_busy = false;
                    let _ = reply.send(result);
                }
            }
        }
        debug!("session worker shutting down");
    }

    fn run_session(&mut self, job: SessionJob) {
        let generation = job.generation;
        let shots_planned = job.shots_planned;
        let result = self.drive(job);

        let mut st = self.shared.lock();
        match result {
            Ok(photo) => {
                st.mode = SessionMode::Success;
                st.message = if shots_planned > 1 {
                    "Photo strip printed!".to_string()
                } else {
                    "Photo printed!".to_string()
                };
                st.photo_filename = Some(photo.filename);
                st.target_timestamp = None;
                info!(generation, "session succeeded");
            }
            Err(err) => {
                error!(generation, error = %err, "session failed");
                st.mode = SessionMode::Error;
                st.message = err.user_message().to_string();
                st.target_timestamp = None;
                // photo_filename stays set when the failure hit after save,
                // so a print-only failure leaves the shot retrievable.
            }
        }
        self.shared.publish(&st);
        drop(st);

        self.hold_result(generation);
    }

    /// Countdown through print. Any error aborts the remaining pipeline.
    fn drive(&mut self, job: SessionJob) -> Result<Photo, Error> {
        wait_until(job.countdown_target);

        let mut frames = Vec::with_capacity(job.shots_planned as usize);
        for shot in 0..job.shots_planned {
            if shot > 0 {
                let gap_target =
                    Utc::now().timestamp_millis() + job.gap.as_millis() as i64;
                self.transition(|st| {
                    st.mode = SessionMode::WaitingBetweenShots;
                    st.target_timestamp = Some(gap_target);
                    st.message =
                        format!("Get ready for photo {} of {}...", shot + 1, job.shots_planned);
                });
                wait_until(gap_target);
            }

            self.transition(|st| {
                st.mode = SessionMode::Capturing;
                st.target_timestamp = None;
                st.message = "Smile!".to_string();
            });
            let frame = self.camera.capture_frame(self.frame_timeout)?;
            frames.push(frame);
            self.transition(|st| st.shots_taken = shot + 1);
            debug!(shot = shot + 1, total = job.shots_planned, "frame captured");
        }

        self.transition(|st| {
            st.mode = SessionMode::Processing;
            st.message = "Printing...".to_string();
        });

        let taken = Local::now();
        let (color, raster, prefix) = if frames.len() == 1 {
            let raster = compose::compose_single(&frames[0], self.dots_per_line);
            match frames.pop() {
                Some(frame) => (frame, raster, "photo"),
                None => return Err(Error::DeviceUnavailable("no frame captured".to_string())),
            }
        } else {
            let raster = compose::compose_strip(&frames, self.dots_per_line);
            (compose::stack_strip(&frames, self.dots_per_line), raster, "strip")
        };

        let photo = self.store.save(&color, prefix, taken)?;
        self.transition(|st| st.photo_filename = Some(photo.filename.clone()));

        self.printer.print_image(&raster)?;
        Ok(photo)
    }

    fn run_reprint(&mut self, filename: &str) -> Result<(), Error> {
        let color = self.store.load_image(filename)?;
        let raster = compose::thermal_prepare(&color, self.dots_per_line);
        info!(filename, "reprinting stored photo");
        self.printer.print_image(&raster)
    }

    fn transition(&self, apply: impl FnOnce(&mut CoreState)) {
        let mut st = self.shared.lock();
        apply(&mut st);
        self.shared.publish(&st);
    }

    /// Keep a terminal result visible for the display-grace period, then
    /// return to Idle unless a client already dismissed it.
    fn hold_result(&self, generation: u64) {
        let deadline = Instant::now() + self.result_display;
        loop {
            {
                let st = self.shared.lock();
                if st.generation != generation || !st.mode.is_terminal() {
                    return;
                }
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(RESULT_POLL.min(deadline - now));
        }

        let mut st = self.shared.lock();
        if st.generation == generation && st.mode.is_terminal() {
            st.return_to_idle();
            self.shared.publish(&st);
        }
    }
}

/// Sleep until an absolute epoch-millisecond deadline on the server clock.
fn wait_until(target_ms: i64) {
    loop {
        let remaining = target_ms - Utc::now().timestamp_millis();
        if remaining <= 0 {
            return;
        }
        std::thread::sleep(Duration::from_millis(remaining.min(1000) as u64));
    }
}
