//! Exclusive, FIFO-ordered access to the one acquisition device
//!
//! [`DeviceHandle`] owns the adapter together with the lock that guards it.
//! The adapter can only be reached through a [`DeviceGuard`], so every
//! configure/acquire sequence is serialized by construction.
//!
//! Waiters take a ticket and are admitted strictly in ticket order. A waiter
//! whose deadline passes leaves the queue and gets `Busy`; the guard releases
//! the lock on drop, including during unwinding.

use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

use super::DeviceAdapter;
use crate::error::{DaqError, Phase};
use crate::types::{DeviceInfo, RawScan, ScanConfig};

#[derive(Debug, Default)]
struct Queue {
    next_ticket: u64,
    waiting: VecDeque<u64>,
    held: bool,
}

struct Slot {
    adapter: Box<dyn DeviceAdapter>,
    configured: Option<ScanConfig>,
    closed: bool,
}

/// The single process-wide handle to the acquisition unit
pub struct DeviceHandle {
    info: DeviceInfo,
    queue: Mutex<Queue>,
    turn: Condvar,
    slot: Mutex<Slot>,
}

impl DeviceHandle {
    /// Take ownership of an opened adapter
    pub fn open<A: DeviceAdapter + 'static>(adapter: A) -> Self {
        let info = adapter.info();
        info!(
            "Device opened: {} (serial {}, {} channels, max {} S/s)",
            info.name, info.serial, info.channel_count, info.max_rate
        );
        Self {
            info,
            queue: Mutex::new(Queue::default()),
            turn: Condvar::new(),
            slot: Mutex::new(Slot {
                adapter: Box::new(adapter),
                configured: None,
                closed: false,
            }),
        }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Number of callers currently waiting for the device
    pub fn queue_len(&self) -> usize {
        self.queue.lock().waiting.len()
    }

    /// Wait in line for exclusive access, at most `timeout`
    ///
    /// # Errors
    /// `Busy` tagged with [`Phase::Lock`] when the turn does not come in time.
    pub fn lock(&self, timeout: Duration) -> Result<DeviceGuard<'_>, DaqError> {
        let started = Instant::now();
        let deadline = started + timeout;

        let mut queue = self.queue.lock();
        let ticket = queue.next_ticket;
        queue.next_ticket += 1;
        queue.waiting.push_back(ticket);

        loop {
            if !queue.held && queue.waiting.front() == Some(&ticket) {
                queue.waiting.pop_front();
                queue.held = true;
                break;
            }
            if Instant::now() >= deadline {
                queue.waiting.retain(|t| *t != ticket);
                let ahead = queue.waiting.len();
                drop(queue);
                // the next waiter may now be at the front
                self.turn.notify_all();
                warn!("Device lock not obtained within {timeout:?} ({ahead} still queued)");
                return Err(DaqError::Busy(format!(
                    "device lock not obtained within {} ms",
                    timeout.as_millis()
                ))
                .in_phase(Phase::Lock));
            }
            self.turn.wait_until(&mut queue, deadline);
        }
        drop(queue);

        debug!("Device lock acquired after {:?}", started.elapsed());
        Ok(DeviceGuard {
            handle: self,
            slot: self.slot.lock(),
        })
    }

    /// Release the device, waiting up to `timeout` for an in-flight
    /// acquisition to finish. Idempotent.
    pub fn close(&self, timeout: Duration) -> Result<(), DaqError> {
        let mut guard = self.lock(timeout)?;
        guard.close()
    }

    fn release(&self) {
        self.queue.lock().held = false;
        self.turn.notify_all();
    }
}

/// Exclusive access to the device; the lock is released on drop
pub struct DeviceGuard<'a> {
    handle: &'a DeviceHandle,
    slot: MutexGuard<'a, Slot>,
}

impl DeviceGuard<'_> {
    fn slot(&mut self) -> &mut Slot {
        &mut self.slot
    }

    /// Configuration currently programmed into the device, if known
    pub fn configured(&self) -> Option<&ScanConfig> {
        self.slot.configured.as_ref()
    }

    pub fn configure(&mut self, config: &ScanConfig) -> Result<(), DaqError> {
        let slot = self.slot();
        if slot.closed {
            return Err(DaqError::DeviceUnavailable("device has been closed".into()));
        }
        // after a failed configure the device state is unknown
        slot.configured = None;
        slot.adapter.configure(config)?;
        slot.configured = Some(config.clone());
        Ok(())
    }

    pub fn acquire(&mut self, count: usize) -> Result<RawScan, DaqError> {
        let slot = self.slot();
        if slot.closed {
            return Err(DaqError::DeviceUnavailable("device has been closed".into()));
        }
        slot.adapter.acquire(count)
    }

    fn close(&mut self) -> Result<(), DaqError> {
        let slot = self.slot();
        if slot.closed {
            return Ok(());
        }
        slot.closed = true;
        slot.configured = None;
        slot.adapter.close()?;
        info!("Device closed");
        Ok(())
    }
}

impl Drop for DeviceGuard<'_> {
    fn drop(&mut self) {
        // the slot mutex is released right after this, when the field drops;
        // only the admitted waiter ever locks it
        self.handle.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::types::{ChannelId, InputRange};
    use std::sync::Arc;
    use std::thread;

    struct NullDevice {
        fail_configure: bool,
    }

    impl DeviceAdapter for NullDevice {
        fn info(&self) -> DeviceInfo {
            DeviceInfo {
                name: "null".into(),
                serial: "0".into(),
                channel_count: 2,
                max_rate: 1000.0,
                max_samples: 100,
                ranges: vec![InputRange::Bip10Volts],
            }
        }

        fn configure(&mut self, _config: &ScanConfig) -> Result<(), DaqError> {
            if self.fail_configure {
                Err(DaqError::DeviceUnavailable("unplugged".into()))
            } else {
                Ok(())
            }
        }

        fn acquire(&mut self, count: usize) -> Result<RawScan, DaqError> {
            Ok(RawScan::new(vec![0.0; count]))
        }

        fn close(&mut self) -> Result<(), DaqError> {
            Ok(())
        }
    }

    fn handle(fail_configure: bool) -> Arc<DeviceHandle> {
        Arc::new(DeviceHandle::open(NullDevice { fail_configure }))
    }

    fn scan() -> ScanConfig {
        ScanConfig {
            channels: vec![ChannelId::new(0)],
            rate: 100.0,
            ranges: vec![InputRange::Bip10Volts],
        }
    }

    fn wait_for_queue(handle: &DeviceHandle, len: usize) {
        while handle.queue_len() < len {
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_waiters_admitted_in_arrival_order() {
        let handle = handle(false);
        let order = Arc::new(Mutex::new(Vec::new()));
        let guard = handle.lock(Duration::from_secs(1)).unwrap();

        let mut workers = Vec::new();
        for id in 0..4 {
            let h = handle.clone();
            let order = order.clone();
            workers.push(thread::spawn(move || {
                let _guard = h.lock(Duration::from_secs(5)).unwrap();
                order.lock().push(id);
                thread::sleep(Duration::from_millis(5));
            }));
            wait_for_queue(&handle, id + 1);
        }

        drop(guard);
        for w in workers {
            w.join().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_lock_wait_times_out_with_busy() {
        let handle = handle(false);
        let guard = handle.lock(Duration::from_secs(1)).unwrap();

        let h = handle.clone();
        let err = thread::spawn(move || h.lock(Duration::from_millis(30)).err())
            .join()
            .unwrap()
            .expect("lock should time out");
        assert_eq!(err.kind(), ErrorKind::Busy);
        assert_eq!(err.phase(), Some(Phase::Lock));
        assert_eq!(handle.queue_len(), 0);

        drop(guard);
        assert!(handle.lock(Duration::from_millis(10)).is_ok());
    }

    #[test]
    fn test_expired_waiter_does_not_block_later_ones() {
        let handle = handle(false);
        let guard = handle.lock(Duration::from_secs(1)).unwrap();

        let h1 = handle.clone();
        let impatient = thread::spawn(move || h1.lock(Duration::from_millis(20)).is_err());
        wait_for_queue(&handle, 1);
        let h2 = handle.clone();
        let patient = thread::spawn(move || h2.lock(Duration::from_secs(5)).is_ok());

        assert!(impatient.join().unwrap());
        drop(guard);
        assert!(patient.join().unwrap());
    }

    #[test]
    fn test_failed_configure_forgets_state() {
        let ok = handle(false);
        {
            let mut guard = ok.lock(Duration::from_secs(1)).unwrap();
            guard.configure(&scan()).unwrap();
            assert_eq!(guard.configured(), Some(&scan()));
        }

        let failing = handle(true);
        let mut guard = failing.lock(Duration::from_secs(1)).unwrap();
        assert!(guard.configure(&scan()).is_err());
        assert!(guard.configured().is_none());
    }

    #[test]
    fn test_closed_device_is_unavailable() {
        let handle = handle(false);
        handle.close(Duration::from_secs(1)).unwrap();
        handle.close(Duration::from_secs(1)).unwrap();

        let mut guard = handle.lock(Duration::from_secs(1)).unwrap();
        let err = guard.acquire(4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeviceUnavailable);
    }
}
