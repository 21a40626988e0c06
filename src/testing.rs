//! Scripted path transport for unit tests.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;

use crate::core::{ControlFlag, PathError, PathTransport};
use crate::mapping::Mapping;

#[derive(Debug)]
struct PathState {
    available_window: u32,
    window: u32,
    rtt: Duration,
    segment_size: u32,
    sent: Vec<(Mapping, Bytes)>,
    control: Vec<ControlFlag>,
    closed: bool,
    refuse_sends: bool,
}

/// Path transport that records everything handed to it.
pub(crate) struct MockPath {
    state: Arc<Mutex<PathState>>,
}

/// Test-side view of a [`MockPath`] after it has been boxed into a subflow.
#[derive(Clone)]
pub(crate) struct PathHandle {
    state: Arc<Mutex<PathState>>,
}

impl MockPath {
    pub(crate) fn new(rtt_ms: u64, window: u32) -> (Self, PathHandle) {
        let state = Arc::new(Mutex::new(PathState {
            available_window: window,
            window,
            rtt: Duration::from_millis(rtt_ms),
            segment_size: 1400,
            sent: Vec::new(),
            control: Vec::new(),
            closed: false,
            refuse_sends: false,
        }));
        (
            Self {
                state: Arc::clone(&state),
            },
            PathHandle { state },
        )
    }

    fn lock(&self) -> MutexGuard<'_, PathState> {
        self.state.lock().unwrap()
    }
}

impl PathHandle {
    fn lock(&self) -> MutexGuard<'_, PathState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn sent(&self) -> Vec<(Mapping, Bytes)> {
        self.lock().sent.clone()
    }

    pub(crate) fn sent_bytes(&self) -> usize {
        self.lock().sent.iter().map(|(_, p)| p.len()).sum()
    }

    pub(crate) fn control(&self) -> Vec<ControlFlag> {
        self.lock().control.clone()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn set_refuse_sends(&self, refuse: bool) {
        self.lock().refuse_sends = refuse;
    }

    pub(crate) fn set_window(&self, window: u32) {
        let mut state = self.lock();
        state.window = window;
        state.available_window = window;
    }

    pub(crate) fn set_rtt(&self, rtt_ms: u64) {
        self.lock().rtt = Duration::from_millis(rtt_ms);
    }
}

impl PathTransport for MockPath {
    fn available_window(&self) -> u32 {
        self.lock().available_window
    }

    fn window(&self) -> u32 {
        self.lock().window
    }

    fn rtt(&self) -> Duration {
        self.lock().rtt
    }

    fn segment_size(&self) -> u32 {
        self.lock().segment_size
    }

    fn send(&mut self, mapping: &Mapping, payload: Bytes) -> Result<(), PathError> {
        let mut state = self.lock();
        if state.closed {
            return Err(PathError::Closed);
        }
        if state.refuse_sends {
            return Err(PathError::WouldBlock);
        }
        state.sent.push((*mapping, payload));
        Ok(())
    }

    fn send_control(&mut self, flag: ControlFlag) -> Result<(), PathError> {
        self.lock().control.push(flag);
        Ok(())
    }

    fn close(&mut self) -> Result<(), PathError> {
        self.lock().closed = true;
        Ok(())
    }
}
