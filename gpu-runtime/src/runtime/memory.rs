// Copyright 2018-2022 Clemens Lutz
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Device memory.
//!
//! All device allocations are accounted against the device's memory budget.
//! Allocations are released when their owner is dropped, which guarantees
//! that device memory is returned on every exit path of an operator.

use crossbeam_utils::CachePadded;

use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use super::device::Device;
use crate::error::{ErrorKind, Result};

/// Tracks the bytes allocated on a device.
#[derive(Debug)]
pub(crate) struct MemoryTracker {
    capacity: usize,
    used: AtomicUsize,
}

impl MemoryTracker {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            used: AtomicUsize::new(0),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    fn reserve(&self, bytes: usize) -> Result<()> {
        let mut used = self.used.load(Ordering::Acquire);
        loop {
            let available = self.capacity - used;
            if bytes > available {
                Err(ErrorKind::OutOfMemory(bytes, available))?;
            }

            match self.used.compare_exchange_weak(
                used,
                used + bytes,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(current) => used = current,
            }
        }
    }

    fn release(&self, bytes: usize) {
        self.used.fetch_sub(bytes, Ordering::AcqRel);
    }
}

/// A claim on device memory, returned to the device when dropped.
#[derive(Debug)]
pub struct Reservation {
    tracker: Arc<MemoryTracker>,
    bytes: usize,
}

impl Reservation {
    /// Claims `bytes` of device memory.
    ///
    /// Fails with `OutOfMemory` if the device budget is exhausted.
    pub fn new(device: &Device, bytes: usize) -> Result<Self> {
        let tracker = device.memory_tracker();
        tracker.reserve(bytes)?;

        Ok(Self { tracker, bytes })
    }

    /// Claims memory for `len` items of type `T`.
    pub fn for_items<T>(device: &Device, len: usize) -> Result<Self> {
        let bytes = len.checked_mul(mem::size_of::<T>()).ok_or_else(|| {
            ErrorKind::IntegerOverflow(format!(
                "Allocation of {} items with {} bytes each overflows",
                len,
                mem::size_of::<T>()
            ))
        })?;

        Self::new(device, bytes)
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.tracker.release(self.bytes);
    }
}

/// Allocates a host vector backing device memory.
///
/// The host allocation is fallible, such that huge requests surface as
/// `OutOfMemory` instead of aborting the process.
pub(crate) fn try_alloc_vec<T>(len: usize) -> Result<Vec<T>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len).map_err(|_| {
        ErrorKind::OutOfMemory(len.saturating_mul(mem::size_of::<T>()), 0)
    })?;

    Ok(data)
}

/// A typed device buffer.
///
/// The buffer is accessible from the host, similar to CUDA unified memory.
/// Kernels write to the buffer through a `LaunchableMutSlice`.
#[derive(Debug)]
pub struct DeviceBuffer<T> {
    data: Vec<T>,
    reservation: Reservation,
}

impl<T> DeviceBuffer<T> {
    /// Allocates a buffer and initializes each item with `f(index)`.
    pub fn from_fn<F>(device: &Device, len: usize, f: F) -> Result<Self>
    where
        F: FnMut(usize) -> T,
    {
        let reservation = Reservation::for_items::<T>(device, len)?;
        let mut data = try_alloc_vec(len)?;
        data.extend((0..len).map(f));

        Ok(Self { data, reservation })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The number of device bytes held by the buffer.
    pub fn size_bytes(&self) -> usize {
        self.reservation.bytes()
    }

    pub fn as_slice(&self) -> &[T] {
        self.data.as_slice()
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        self.data.as_mut_slice()
    }

    /// Returns a slice that kernels can scatter writes into.
    pub fn as_launchable_mut_slice(&mut self) -> LaunchableMutSlice<'_, T> {
        LaunchableMutSlice::new(self.data.as_mut_slice())
    }

    /// Moves the contents to the host and frees the device memory.
    pub fn into_host_vec(mut self) -> Vec<T> {
        mem::take(&mut self.data)
    }
}

impl<T: Clone + Default> DeviceBuffer<T> {
    /// Allocates a buffer filled with the default value of `T`.
    pub fn zeroed(device: &Device, len: usize) -> Result<Self> {
        Self::filled(device, T::default(), len)
    }

    pub fn filled(device: &Device, value: T, len: usize) -> Result<Self> {
        Self::from_fn(device, len, |_| value.clone())
    }
}

impl<T: Clone> DeviceBuffer<T> {
    /// Copies a host slice to the device.
    pub fn from_slice(device: &Device, src: &[T]) -> Result<Self> {
        let reservation = Reservation::for_items::<T>(device, src.len())?;
        let mut data = try_alloc_vec(src.len())?;
        data.extend_from_slice(src);

        Ok(Self { data, reservation })
    }

    /// Copies the buffer contents to a host vector.
    pub fn to_host_vec(&self) -> Vec<T> {
        self.data.clone()
    }
}

impl<T> Deref for DeviceBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        self.as_slice()
    }
}

impl<T> DerefMut for DeviceBuffer<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        self.as_mut_slice()
    }
}

/// A mutable slice that can be shared by all threads of a kernel.
///
/// Threads scatter writes to distinct indices, e.g., to slots claimed with an
/// atomic cursor. The slice cannot be read during the launch.
#[derive(Debug)]
pub struct LaunchableMutSlice<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

unsafe impl<'a, T: Send> Send for LaunchableMutSlice<'a, T> {}
unsafe impl<'a, T: Send> Sync for LaunchableMutSlice<'a, T> {}

impl<'a, T> LaunchableMutSlice<'a, T> {
    pub fn new(slice: &'a mut [T]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
            _marker: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Writes `value` to `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds. Inside a kernel, the panic fails the
    /// launch.
    ///
    /// # Safety
    ///
    /// No other thread may access `index` during the same launch.
    pub unsafe fn write(&self, index: usize, value: T)
    where
        T: Copy,
    {
        assert!(
            index < self.len,
            "Write at index {} out of bounds of length {}",
            index,
            self.len
        );
        self.ptr.add(index).write(value);
    }
}

/// A device-resident counter
///
/// Kernels increment the counter atomically; the host reads the result after
/// the launch has completed.
#[derive(Debug)]
pub struct DeviceCounter {
    value: CachePadded<AtomicU64>,
    _reservation: Reservation,
}

impl DeviceCounter {
    pub fn new(device: &Device) -> Result<Self> {
        let reservation = Reservation::for_items::<u64>(device, 1)?;

        Ok(Self {
            value: CachePadded::new(AtomicU64::new(0)),
            _reservation: reservation,
        })
    }

    /// Sets the counter back to zero.
    pub fn reset(&self) {
        self.value.store(0, Ordering::Release);
    }

    /// Adds `value` and returns the previous count.
    pub fn fetch_add(&self, value: u64) -> u64 {
        self.value.fetch_add(value, Ordering::Relaxed)
    }

    pub fn increment(&self) -> u64 {
        self.fetch_add(1)
    }

    /// Copies the count to the host.
    pub fn load(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::runtime::device::DeviceBuilder;

    #[test]
    fn buffer_is_released_on_drop() {
        let device = DeviceBuilder::default()
            .memory_capacity(1024)
            .build()
            .unwrap();

        let buffer = DeviceBuffer::<u32>::zeroed(&device, 16).unwrap();
        assert_eq!(buffer.size_bytes(), 64);
        assert_eq!(device.memory_used(), 64);

        drop(buffer);
        assert_eq!(device.memory_used(), 0);
    }

    #[test]
    fn allocation_beyond_budget_fails() {
        let device = DeviceBuilder::default()
            .memory_capacity(100)
            .build()
            .unwrap();
        let _first = DeviceBuffer::<u64>::zeroed(&device, 10).unwrap();

        let error = DeviceBuffer::<u64>::zeroed(&device, 10).unwrap_err();

        match error.kind() {
            ErrorKind::OutOfMemory(requested, available) => {
                assert_eq!(*requested, 80);
                assert_eq!(*available, 20);
            }
            other => panic!("Unexpected error: {}", other),
        }
        assert_eq!(device.memory_used(), 80);
    }

    #[test]
    fn into_host_vec_frees_device_memory() {
        let device = DeviceBuilder::default().build().unwrap();
        let buffer = DeviceBuffer::from_slice(&device, &[1_u32, 2, 3]).unwrap();

        let host = buffer.into_host_vec();

        assert_eq!(host, vec![1, 2, 3]);
        assert_eq!(device.memory_used(), 0);
    }

    #[test]
    fn counter_reset() {
        let device = DeviceBuilder::default().build().unwrap();
        let counter = DeviceCounter::new(&device).unwrap();

        counter.increment();
        assert_eq!(counter.fetch_add(5), 1);
        assert_eq!(counter.load(), 6);

        counter.reset();
        assert_eq!(counter.load(), 0);
    }
}
