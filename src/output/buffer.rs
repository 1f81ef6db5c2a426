use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::fifo::FifoBuf;
use crate::options::Options;
use crate::output::device::Device;
use crate::params::SoundParams;
use crate::softmixer::SoftMixer;

/// Caps on how much audio one worker iteration hands to the device, so
/// control operations never wait behind a long write.
const AUDIO_MAX_PLAY_SEC: f64 = 0.1;
const AUDIO_MAX_PLAY_BYTES: usize = 32 * 1024;

/// How long a failed device reopen waits before the next attempt.
const REOPEN_RETRY: Duration = Duration::from_secs(1);

type FreeCallback = Box<dyn FnMut() + Send>;

struct State {
    fifo: FifoBuf,
    params: Option<SoundParams>,
    paused: bool,
    stopped: bool,
    exiting: bool,
    reset_device: bool,
    parked: bool,
    prebuffering: bool,
    prebuffer: usize,
    played_time: f64,
    hw_fill: usize,
    free_callback: Option<FreeCallback>,
}

impl State {
    fn bytes_per_second(&self) -> usize {
        self.params.map_or(0, |p| p.bytes_per_second())
    }
}

struct Shared {
    state: Mutex<State>,
    /// Data was written or a flag changed; unparks the worker.
    data_cond: Condvar,
    /// The worker made progress; wakes producers and control callers.
    space_cond: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, cond: &Condvar, guard: MutexGuard<'a, State>) -> MutexGuard<'a, State> {
        cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded byte queue in front of an audio device, drained by a dedicated
/// worker thread that owns the device lifecycle and the wall-clock
/// accounting of played audio.
///
/// The producer feeds `put` (blocking on backpressure), a front-end calls
/// the control operations concurrently, and only the worker ever touches
/// the device.
pub struct OutputBuffer {
    shared: Arc<Shared>,
    worker: Option<thread::JoinHandle<()>>,
}

impl OutputBuffer {
    /// Creates the buffer and starts its worker. FIFO capacity and the
    /// prebuffer threshold come from `opts`; when `mixer` is given the
    /// worker runs every drained chunk through it before the device.
    pub fn new(
        device: Box<dyn Device>,
        opts: &Options,
        mixer: Option<Arc<Mutex<SoftMixer>>>,
    ) -> Self {
        let size = opts.output_buffer_bytes();
        let prebuffer = opts.prebuffering_bytes().min(size);

        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                fifo: FifoBuf::new(size),
                params: None,
                paused: false,
                stopped: false,
                exiting: false,
                reset_device: false,
                parked: false,
                prebuffering: prebuffer > 0,
                prebuffer,
                played_time: 0.0,
                hw_fill: 0,
                free_callback: None,
            }),
            data_cond: Condvar::new(),
            space_cond: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let use_rt = opts.use_realtime_priority;
        let worker = thread::spawn(move || worker_loop(worker_shared, device, mixer, use_rt));

        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// Declares the format of the bytes the producer is about to `put`.
    /// Must be called before the first `put` of a stream; a change takes
    /// effect when the worker next touches the device.
    pub fn set_params(&self, params: SoundParams) {
        let mut state = self.shared.lock();
        state.params = Some(params);
    }

    /// Appends `data`, blocking while the FIFO is full. Returns the number
    /// of bytes accepted: all of them normally, fewer if `stop` lands
    /// mid-call, 0 when the buffer is already stopped.
    pub fn put(&self, data: &[u8]) -> usize {
        let mut accepted = 0;
        let mut state = self.shared.lock();

        while accepted < data.len() {
            while state.fifo.space() == 0 && !state.stopped && !state.exiting {
                state = self.shared.wait(&self.shared.space_cond, state);
            }
            if state.stopped || state.exiting {
                debug!("buffer is stopped, refusing to write");
                break;
            }

            let written = state.fifo.put(&data[accepted..]);
            accepted += written;

            if written > 0 {
                // During prebuffering the worker stays parked until the
                // threshold is reached once.
                if !state.prebuffering || state.fifo.fill() >= state.prebuffer {
                    state.prebuffering = false;
                    self.shared.data_cond.notify_one();
                }
            }
        }

        accepted
    }

    /// Ends the prebuffering phase early so short streams start playing.
    pub fn start_playback(&self) {
        let mut state = self.shared.lock();
        state.prebuffering = false;
        self.shared.data_cond.notify_one();
    }

    /// Pauses playback. The worker closes the device at its next park and
    /// keeps the buffered bytes.
    pub fn pause(&self) {
        let mut state = self.shared.lock();
        state.paused = true;
        state.reset_device = true;
    }

    pub fn unpause(&self) {
        let mut state = self.shared.lock();
        state.paused = false;
        state.prebuffering = false;
        self.shared.data_cond.notify_one();
    }

    /// Stops playback and discards buffered audio. On return the worker
    /// has cleared the FIFO and parked; subsequent `put` calls return 0
    /// until `reset`.
    pub fn stop(&self) {
        debug!("stopping the buffer");
        let mut state = self.shared.lock();
        state.stopped = true;
        state.paused = false;
        state.reset_device = true;
        state.prebuffering = false;
        self.shared.data_cond.notify_one();

        while !(state.parked && state.fifo.is_empty()) {
            state = self.shared.wait(&self.shared.space_cond, state);
        }
        debug!("buffer stopped");
    }

    /// Returns the buffer to a playable state after `stop`. Must not run
    /// concurrently with `put`.
    pub fn reset(&self) {
        let mut state = self.shared.lock();
        debug_assert!(
            state.stopped || state.fifo.is_empty(),
            "reset on a buffer that is neither stopped nor drained"
        );
        state.fifo.clear();
        state.stopped = false;
        state.paused = false;
        state.reset_device = false;
        state.hw_fill = 0;
        state.prebuffering = state.prebuffer > 0;
    }

    pub fn time_set(&self, seconds: f64) {
        let mut state = self.shared.lock();
        state.played_time = seconds;
    }

    /// Seconds of audio audible so far: time played into the device minus
    /// what the device still buffers. Never negative, non-decreasing
    /// between resets unless `time_set` intervenes.
    pub fn time_get(&self) -> f64 {
        let state = self.shared.lock();
        let bps = state.bytes_per_second();
        let pending = if bps > 0 {
            state.hw_fill as f64 / bps as f64
        } else {
            0.0
        };
        (state.played_time - pending).max(0.0)
    }

    /// Registers a callback invoked by the worker whenever buffer space
    /// may have become available. It runs on the worker thread with the
    /// buffer lock released; it must not call `put` or drop the buffer
    /// synchronously.
    pub fn set_free_callback<F>(&self, callback: F)
    where
        F: FnMut() + Send + 'static,
    {
        let mut state = self.shared.lock();
        state.free_callback = Some(Box::new(callback));
    }

    pub fn get_free(&self) -> usize {
        self.shared.lock().fifo.space()
    }

    pub fn get_fill(&self) -> usize {
        self.shared.lock().fifo.fill()
    }

    /// Blocks until the worker is parked (FIFO empty, paused or stopped),
    /// guaranteeing the device is idle as long as nothing new is `put`.
    pub fn wait_until_parked(&self) {
        debug!("waiting for the worker to park");
        let mut state = self.shared.lock();
        while !state.parked {
            state = self.shared.wait(&self.shared.space_cond, state);
        }
    }

    /// Shuts the worker down and joins it. The worker finishes draining
    /// unless playback is paused or stopped. No producer may be active.
    pub fn destroy(&mut self) {
        {
            let mut state = self.shared.lock();
            state.exiting = true;
            state.prebuffering = false;
            self.shared.data_cond.notify_one();
        }

        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("output buffer worker panicked");
            }
        }

        let mut state = self.shared.lock();
        state.fifo.clear();
        self.shared.space_cond.notify_all();
        debug!("output buffer destroyed");
    }
}

impl Drop for OutputBuffer {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.destroy();
        }
    }
}

fn worker_loop(
    shared: Arc<Shared>,
    mut device: Box<dyn Device>,
    mixer: Option<Arc<Mutex<SoftMixer>>>,
    use_realtime_priority: bool,
) {
    debug!("entering output buffer worker");

    if use_realtime_priority {
        set_realtime_priority();
    }

    let mut device_open = false;
    let mut open_params: Option<SoundParams> = None;
    let mut scratch = vec![0u8; AUDIO_MAX_PLAY_BYTES];

    let mut state = shared.lock();

    loop {
        if state.reset_device && device_open {
            if !device.reset() {
                warn!("audio device reset failed");
            }
            state.reset_device = false;
        }

        if state.stopped {
            state.fifo.clear();
        }

        if let Some(mut callback) = state.free_callback.take() {
            // The callback runs without the lock so it may query the buffer.
            drop(state);
            callback();
            state = shared.lock();
            if state.free_callback.is_none() {
                state.free_callback = Some(callback);
            }
        }

        shared.space_cond.notify_all();

        if (state.fifo.is_empty() || state.paused || state.stopped || state.prebuffering)
            && !state.exiting
        {
            if state.paused && device_open {
                info!("closing the device on pause");
                device.close();
                device_open = false;
            }
            state.parked = true;
            state = shared.wait(&shared.data_cond, state);
            state.parked = false;
        }

        if state.exiting && (state.fifo.is_empty() || state.paused || state.stopped) {
            debug!("worker told to exit");
            break;
        }

        if state.fifo.is_empty() || state.paused || state.stopped || state.prebuffering {
            continue;
        }

        let Some(params) = state.params else {
            warn!("data queued without sound parameters, dropping it");
            state.fifo.clear();
            continue;
        };

        if device_open && open_params != Some(params) {
            info!("sound parameters changed, closing the device");
            device.close();
            device_open = false;
        }

        if !device_open {
            match device.open(&params) {
                Ok(()) => {
                    device_open = true;
                    open_params = Some(params);
                }
                Err(err) => {
                    warn!("cannot open audio device: {err}; retrying in 1s");
                    let (guard, _) = shared
                        .data_cond
                        .wait_timeout(state, REOPEN_RETRY)
                        .unwrap_or_else(PoisonError::into_inner);
                    state = guard;
                    if state.exiting {
                        debug!("reopen retry cancelled by shutdown");
                        break;
                    }
                    continue;
                }
            }
        }

        let bps = state.bytes_per_second();
        let max_play = if bps > 0 {
            ((bps as f64 * AUDIO_MAX_PLAY_SEC) as usize).clamp(1, AUDIO_MAX_PLAY_BYTES)
        } else {
            AUDIO_MAX_PLAY_BYTES
        };
        let n = state.fifo.get(&mut scratch[..max_play]);

        // The device may block for tens of milliseconds; keep the lock
        // free while it does.
        drop(state);

        if let Some(mixer) = &mixer {
            if let Ok(mixer) = mixer.lock() {
                mixer.process_buffer(&mut scratch[..n], &params);
            }
        }

        let mut pos = 0;
        while pos < n {
            match device.play(&scratch[pos..n]) {
                Ok(0) => {
                    warn!("device accepted no data, dropping {} bytes", n - pos);
                    break;
                }
                Ok(written) => pos += written,
                Err(err) => {
                    warn!("device write failed: {err}; dropping {} bytes", n - pos);
                    break;
                }
            }
        }

        state = shared.lock();
        if pos > 0 && bps > 0 {
            state.played_time += pos as f64 / bps as f64;
        }
        state.hw_fill = device.buf_fill();
    }

    drop(state);
    if device_open {
        device.close();
    }
    debug!("output buffer worker exiting");
}

#[cfg(unix)]
fn set_realtime_priority() {
    unsafe {
        let priority = libc::sched_get_priority_max(libc::SCHED_RR);
        if priority < 0 {
            warn!("cannot query SCHED_RR priority range");
            return;
        }
        let param = libc::sched_param {
            sched_priority: priority,
        };
        if libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_RR, &param) != 0 {
            warn!("cannot set realtime priority for the playback worker");
        }
    }
}

#[cfg(not(unix))]
fn set_realtime_priority() {
    info!("realtime worker priority is not supported on this platform");
}
