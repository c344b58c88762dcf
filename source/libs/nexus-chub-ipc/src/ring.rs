// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Lock-free single-producer/single-consumer byte ring with length-prefixed frames
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Unstable
//! TEST_COVERAGE: 13 unit tests, property tests in `tests/ring_props.rs`
//!
//! Block layout (see `layout::RING_*`): `eq`, `dq`, `full`, `empty`, write
//! and read counters, then `capacity` bytes of storage.
//!
//! Frames are a 2-byte little-endian length followed by the payload. The
//! producer only moves `eq`, the consumer only moves `dq`; `eq == dq` is
//! disambiguated by the `full`/`empty` flags. Payload bytes are stored before
//! the index that publishes them, and the index store is sequentially
//! consistent, so a consumer that observes the new `eq` observes the bytes.

use std::sync::atomic::Ordering;

use log::{debug, error};
use serde::Serialize;

use crate::error::{IpcError, Result};
use crate::layout::{RING_BUF, RING_CNT_RD, RING_CNT_WT, RING_DQ, RING_EMPTY, RING_EQ, RING_FULL};
use crate::shm::SharedMem;

const LEN_PREFIX: usize = 2;

/// Next frame as located by the consumer.
struct Frame {
    /// `eq` observed while locating the frame.
    eq: usize,
    /// `full` observed while locating the frame.
    full: bool,
    size: usize,
    /// Index of the first payload byte.
    at: usize,
}

/// Control words of one ring, as seen at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RingState {
    pub eq: u32,
    pub dq: u32,
    pub full: bool,
    pub empty: bool,
    pub written: u32,
    pub read: u32,
}

/// View of one lane's ring inside shared memory.
pub struct DataRing<'a, S: SharedMem + ?Sized> {
    shm: &'a S,
    base: usize,
    capacity: usize,
    packet_max: usize,
}

impl<'a, S: SharedMem + ?Sized> DataRing<'a, S> {
    /// `base` is the window offset of the ring block.
    pub fn new(shm: &'a S, base: usize, capacity: usize, packet_max: usize) -> Self {
        Self { shm, base, capacity, packet_max }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn word(&self, field: usize) -> u32 {
        self.shm.load_u32(self.base + field, Ordering::SeqCst)
    }

    fn set_word(&self, field: usize, value: u32) {
        self.shm.store_u32(self.base + field, value, Ordering::SeqCst)
    }

    fn index(&self, field: usize) -> usize {
        self.word(field) as usize
    }

    fn advance(&self, idx: usize, by: usize) -> usize {
        (idx + by) % self.capacity
    }

    /// Empties the ring. Only the side laying out the memory calls this.
    pub fn reset(&self) {
        self.set_word(RING_EQ, 0);
        self.set_word(RING_DQ, 0);
        self.set_word(RING_FULL, 0);
        self.set_word(RING_EMPTY, 1);
        self.set_word(RING_CNT_WT, 0);
        self.set_word(RING_CNT_RD, 0);
    }

    pub fn state(&self) -> RingState {
        RingState {
            eq: self.word(RING_EQ),
            dq: self.word(RING_DQ),
            full: self.word(RING_FULL) != 0,
            empty: self.word(RING_EMPTY) != 0,
            written: self.word(RING_CNT_WT),
            read: self.word(RING_CNT_RD),
        }
    }

    /// Loads `eq` and `dq`, rejecting values the peer could not have written.
    fn indices(&self) -> Result<(usize, usize)> {
        let eq = self.index(RING_EQ);
        let dq = self.index(RING_DQ);
        for index in [eq, dq] {
            if index >= self.capacity {
                error!(target: "chub_ipc::ring", "index {index} outside ring of {}", self.capacity);
                return Err(IpcError::BadIndex { index, limit: self.capacity });
            }
        }
        Ok((eq, dq))
    }

    /// Free bytes as the producer sees them.
    ///
    /// With `eq == dq` and neither flag set the consumer is between clearing
    /// `full` and setting `empty`; that reads as full until it finishes.
    fn writable(&self, eq: usize, dq: usize) -> Result<usize> {
        if eq > dq {
            Ok(dq + (self.capacity - eq))
        } else if eq < dq {
            Ok(dq - eq)
        } else if self.word(RING_FULL) == 0 && self.word(RING_EMPTY) != 0 {
            Ok(self.capacity)
        } else {
            Err(IpcError::Full)
        }
    }

    /// Pending bytes as the consumer sees them. Returns the `full` flag seen.
    ///
    /// With `eq == dq` only `full` counts as data: `empty` is cleared by the
    /// producer before it publishes `eq`.
    fn readable(&self, eq: usize, dq: usize) -> Result<(usize, bool)> {
        let full = self.word(RING_FULL) != 0;
        if eq > dq {
            Ok((eq - dq, full))
        } else if eq < dq {
            Ok(((self.capacity - dq) + eq, full))
        } else if full {
            Ok((self.capacity, full))
        } else {
            Err(IpcError::Empty)
        }
    }

    /// Copies `src` into the ring at `at`, splitting at the physical end.
    /// Returns the index after the last byte.
    fn copy_in(&self, at: usize, src: &[u8]) -> usize {
        if at + src.len() > self.capacity {
            let top = self.capacity - at;
            self.shm.write_bytes(self.base + RING_BUF + at, &src[..top]);
            self.shm.write_bytes(self.base + RING_BUF, &src[top..]);
            src.len() - top
        } else {
            self.shm.write_bytes(self.base + RING_BUF + at, src);
            self.advance(at, src.len())
        }
    }

    fn copy_out(&self, at: usize, dst: &mut [u8]) -> usize {
        if at + dst.len() > self.capacity {
            let top = self.capacity - at;
            self.shm.read_bytes(self.base + RING_BUF + at, &mut dst[..top]);
            self.shm.read_bytes(self.base + RING_BUF, &mut dst[top..]);
            dst.len() - top
        } else {
            self.shm.read_bytes(self.base + RING_BUF + at, dst);
            self.advance(at, dst.len())
        }
    }

    fn put_byte(&self, at: usize, byte: u8) -> usize {
        self.shm.store_u8(self.base + RING_BUF + at, byte);
        self.advance(at, 1)
    }

    fn get_byte(&self, at: usize) -> (u8, usize) {
        (self.shm.load_u8(self.base + RING_BUF + at), self.advance(at, 1))
    }

    /// Appends one frame. Producer side only.
    ///
    /// Commit order: payload, clear `empty`, publish `eq`, then set `full` if
    /// the frame reached the `dq` observed before writing.
    pub fn write(&self, payload: &[u8]) -> Result<()> {
        if payload.len() > self.packet_max {
            return Err(IpcError::InvalidLength { len: payload.len(), max: self.packet_max });
        }
        let (mut eq, dq) = self.indices()?;
        let useful = self.writable(eq, dq).inspect_err(|_| {
            debug!(target: "chub_ipc::ring", "write: full (eq={eq} dq={dq})");
        })?;
        if payload.len() + LEN_PREFIX > useful {
            debug!(
                target: "chub_ipc::ring",
                "write: no room for {} bytes, {} free (eq={eq} dq={dq})",
                payload.len(),
                useful
            );
            return Err(IpcError::Full);
        }

        let len = payload.len() as u16;
        eq = self.put_byte(eq, len as u8);
        eq = self.put_byte(eq, (len >> 8) as u8);
        eq = self.copy_in(eq, payload);

        if self.word(RING_EMPTY) != 0 {
            self.set_word(RING_EMPTY, 0);
        }
        self.set_word(RING_EQ, eq as u32);
        self.shm.bump_u32(self.base + RING_CNT_WT, Ordering::SeqCst);
        if eq == dq {
            self.set_word(RING_FULL, 1);
        }
        Ok(())
    }

    /// Length of the next frame without consuming it.
    pub fn peek_len(&self) -> Result<usize> {
        Ok(self.next_frame()?.size)
    }

    /// Locates the next complete frame.
    fn next_frame(&self) -> Result<Frame> {
        let (eq, dq) = self.indices()?;
        let (useful, full) = self.readable(eq, dq)?;

        let (low, at) = self.get_byte(dq);
        let (high, at) = self.get_byte(at);
        let size = usize::from(u16::from_le_bytes([low, high]));
        if size > self.packet_max {
            error!(target: "chub_ipc::ring", "read: wrong size {size} (eq={eq} dq={dq})");
            return Err(IpcError::Corrupt { len: size });
        }
        if useful < LEN_PREFIX + size {
            debug!(
                target: "chub_ipc::ring",
                "read: frame of {size} bytes not complete, {useful} available"
            );
            return Err(IpcError::WouldBlock);
        }
        Ok(Frame { eq, full, size, at })
    }

    /// Pops one frame into `out`, returning its length. Consumer side only.
    ///
    /// Commit order: clear `full` while `dq` still holds the producer off,
    /// publish `dq`, then set `empty` if the read reached the `eq` observed
    /// before reading.
    pub fn read(&self, out: &mut [u8]) -> Result<usize> {
        let frame = self.next_frame()?;
        if out.len() < frame.size {
            return Err(IpcError::BufferTooSmall { needed: frame.size });
        }
        let dq = self.copy_out(frame.at, &mut out[..frame.size]);

        if frame.full {
            self.set_word(RING_FULL, 0);
        }
        self.set_word(RING_DQ, dq as u32);
        self.shm.bump_u32(self.base + RING_CNT_RD, Ordering::SeqCst);
        if dq == frame.eq {
            self.set_word(RING_EMPTY, 1);
        }
        Ok(frame.size)
    }

    /// Pops one frame into a fresh buffer.
    pub fn read_vec(&self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; self.packet_max];
        let len = self.read(&mut out)?;
        out.truncate(len);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shm::HostShm;
    use std::sync::atomic::{AtomicU32, AtomicUsize};
    use std::sync::Mutex;

    type Hook = Box<dyn FnOnce(&HostShm) + Send>;

    /// Window that runs a peer action once, right after the store to `trigger`.
    struct Interleaved {
        inner: HostShm,
        trigger: usize,
        peer: Mutex<Option<Hook>>,
    }

    impl Interleaved {
        fn new(inner: HostShm, trigger: usize, peer: impl FnOnce(&HostShm) + Send + 'static) -> Self {
            Self { inner, trigger, peer: Mutex::new(Some(Box::new(peer))) }
        }
    }

    impl SharedMem for Interleaved {
        fn words(&self) -> &[AtomicU32] {
            self.inner.words()
        }

        fn store_u32(&self, offset: usize, value: u32, order: Ordering) {
            self.inner.store_u32(offset, value, order);
            if offset == self.trigger {
                if let Some(peer) = self.peer.lock().unwrap().take() {
                    peer(&self.inner);
                }
            }
        }
    }

    /// Window counting stores after which both flags read as set.
    struct FlagWatch {
        inner: HostShm,
        both_set: AtomicUsize,
    }

    impl SharedMem for FlagWatch {
        fn words(&self) -> &[AtomicU32] {
            self.inner.words()
        }

        fn store_u32(&self, offset: usize, value: u32, order: Ordering) {
            self.inner.store_u32(offset, value, order);
            let full = self.inner.load_u32(RING_FULL, Ordering::SeqCst);
            let empty = self.inner.load_u32(RING_EMPTY, Ordering::SeqCst);
            if full != 0 && empty != 0 {
                self.both_set.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn ring(shm: &HostShm, capacity: usize) -> DataRing<'_, HostShm> {
        let ring = DataRing::new(shm, 0, capacity, 272);
        ring.reset();
        ring
    }

    #[test]
    fn write_then_read_roundtrip() {
        let shm = HostShm::new(RING_BUF + 64);
        let r = ring(&shm, 64);
        r.write(b"hello").unwrap();
        assert_eq!(r.peek_len().unwrap(), 5);
        assert_eq!(r.read_vec().unwrap(), b"hello");
        assert_eq!(r.read_vec(), Err(IpcError::Empty));
    }

    #[test]
    fn zero_length_frame() {
        let shm = HostShm::new(RING_BUF + 16);
        let r = ring(&shm, 16);
        r.write(&[]).unwrap();
        assert_eq!(r.state().eq, 2);
        assert_eq!(r.read_vec().unwrap(), Vec::<u8>::new());
        assert!(r.state().empty);
    }

    #[test]
    fn prefix_is_low_byte_first() {
        let shm = HostShm::new(RING_BUF + 512);
        let r = ring(&shm, 512);
        r.write(&[0xab; 258]).unwrap();
        assert_eq!(shm.load_u8(RING_BUF), 0x02);
        assert_eq!(shm.load_u8(RING_BUF + 1), 0x01);
        assert_eq!(shm.load_u8(RING_BUF + 2), 0xab);
    }

    #[test]
    fn fill_to_capacity_then_full_then_drain_to_empty() {
        let shm = HostShm::new(RING_BUF + 16);
        let r = ring(&shm, 16);
        // Two 6-byte frames exactly use 16 bytes.
        r.write(&[1; 6]).unwrap();
        r.write(&[2; 6]).unwrap();
        let st = r.state();
        assert_eq!(st.eq, st.dq);
        assert!(st.full && !st.empty);
        assert_eq!(r.write(&[]), Err(IpcError::Full));

        assert_eq!(r.read_vec().unwrap(), vec![1; 6]);
        let st = r.state();
        assert!(!st.full && !st.empty);
        assert_eq!(r.read_vec().unwrap(), vec![2; 6]);
        let st = r.state();
        assert!(st.empty && !st.full);
        assert_eq!(r.read_vec(), Err(IpcError::Empty));
    }

    #[test]
    fn frame_larger_than_free_space_is_full() {
        let shm = HostShm::new(RING_BUF + 16);
        let r = ring(&shm, 16);
        r.write(&[0; 10]).unwrap();
        assert_eq!(r.write(&[0; 4]), Err(IpcError::Full));
        assert_eq!(r.state().written, 1);
    }

    #[test]
    fn wraparound_splits_top_and_bottom() {
        let shm = HostShm::new(RING_BUF + 16);
        let r = ring(&shm, 16);
        shm.store_u32(RING_EQ, 14, Ordering::SeqCst);
        shm.store_u32(RING_DQ, 14, Ordering::SeqCst);

        r.write(&[0xa1, 0xa2, 0xa3, 0xa4]).unwrap();
        // Prefix fills bytes 14 and 15; the payload lands at 0..4.
        assert_eq!(shm.load_u8(RING_BUF + 14), 4);
        assert_eq!(shm.load_u8(RING_BUF + 15), 0);
        let mut raw = [0u8; 4];
        shm.read_bytes(RING_BUF, &mut raw);
        assert_eq!(raw, [0xa1, 0xa2, 0xa3, 0xa4]);
        assert_eq!(r.state().eq, 4);

        assert_eq!(r.read_vec().unwrap(), vec![0xa1, 0xa2, 0xa3, 0xa4]);
        assert_eq!(r.state().dq, 4);
    }

    #[test]
    fn payload_split_across_end() {
        let shm = HostShm::new(RING_BUF + 16);
        let r = ring(&shm, 16);
        shm.store_u32(RING_EQ, 10, Ordering::SeqCst);
        shm.store_u32(RING_DQ, 10, Ordering::SeqCst);

        r.write(&[1, 2, 3, 4, 5, 6, 7]).unwrap();
        let mut top = [0u8; 4];
        shm.read_bytes(RING_BUF + 12, &mut top);
        assert_eq!(top, [1, 2, 3, 4]);
        let mut bottom = [0u8; 3];
        shm.read_bytes(RING_BUF, &mut bottom);
        assert_eq!(bottom, [5, 6, 7]);
        assert_eq!(r.state().eq, 3);
        assert_eq!(r.read_vec().unwrap(), vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn oversized_prefix_is_corrupt() {
        let shm = HostShm::new(RING_BUF + 64);
        let r = DataRing::new(&shm, 0, 64, 8);
        r.reset();
        shm.write_bytes(RING_BUF, &[9, 0]);
        shm.store_u32(RING_EQ, 11, Ordering::SeqCst);
        shm.store_u32(RING_EMPTY, 0, Ordering::SeqCst);
        assert_eq!(r.read_vec(), Err(IpcError::Corrupt { len: 9 }));
        assert_eq!(r.write(&[0; 9]), Err(IpcError::InvalidLength { len: 9, max: 8 }));
    }

    #[test]
    fn partial_frame_would_block() {
        let shm = HostShm::new(RING_BUF + 64);
        let r = ring(&shm, 64);
        // Prefix announces 10 bytes but only 4 are published.
        shm.write_bytes(RING_BUF, &[10, 0]);
        shm.store_u32(RING_EQ, 6, Ordering::SeqCst);
        shm.store_u32(RING_EMPTY, 0, Ordering::SeqCst);
        assert_eq!(r.read_vec(), Err(IpcError::WouldBlock));
        assert_eq!(r.state().dq, 0);

        let mut small = [0u8; 2];
        shm.write_bytes(RING_BUF, &[4, 0]);
        assert_eq!(r.read(&mut small), Err(IpcError::BufferTooSmall { needed: 4 }));
    }

    #[test]
    fn reader_draining_during_commit_leaves_ring_empty() {
        let inner = HostShm::new(RING_BUF + 64);
        ring(&inner, 64);
        let shm = Interleaved::new(inner.clone(), RING_EQ, |peer| {
            let consumer = DataRing::new(peer, 0, 64, 272);
            assert_eq!(consumer.read_vec().unwrap(), b"abc");
        });
        DataRing::new(&shm, 0, 64, 272).write(b"abc").unwrap();

        let consumer = DataRing::new(&inner, 0, 64, 272);
        let st = consumer.state();
        assert_eq!((st.eq, st.dq, st.full, st.empty), (5, 5, false, true));
        assert_eq!(consumer.read_vec(), Err(IpcError::Empty));
    }

    #[test]
    fn writer_refilling_during_read_commit_is_seen() {
        let inner = HostShm::new(RING_BUF + 16);
        let r = ring(&inner, 16);
        r.write(&[1; 6]).unwrap();
        r.write(&[2; 6]).unwrap();
        assert!(r.state().full);

        let shm = Interleaved::new(inner.clone(), RING_DQ, |peer| {
            DataRing::new(peer, 0, 16, 272).write(&[3; 6]).unwrap();
        });
        assert_eq!(DataRing::new(&shm, 0, 16, 272).read_vec().unwrap(), vec![1; 6]);

        let st = r.state();
        assert_eq!(st.eq, st.dq);
        assert!(st.full && !st.empty);
        assert_eq!(r.write(&[]), Err(IpcError::Full));
        assert_eq!(r.read_vec().unwrap(), vec![2; 6]);
        assert_eq!(r.read_vec().unwrap(), vec![3; 6]);
        assert_eq!(r.read_vec(), Err(IpcError::Empty));
    }

    #[test]
    fn flags_are_never_both_set() {
        let shm = FlagWatch { inner: HostShm::new(RING_BUF + 16), both_set: AtomicUsize::new(0) };
        let r = DataRing::new(&shm, 0, 16, 272);
        r.reset();
        r.write(&[1; 6]).unwrap();
        r.write(&[2; 6]).unwrap();
        assert!(r.state().full);
        r.read_vec().unwrap();
        r.read_vec().unwrap();
        assert!(r.state().empty);
        assert_eq!(shm.both_set.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn peer_index_outside_ring_is_rejected() {
        let shm = HostShm::new(RING_BUF + 64);
        let r = ring(&shm, 64);
        shm.store_u32(RING_EQ, 72, Ordering::SeqCst);
        assert_eq!(r.write(b"x"), Err(IpcError::BadIndex { index: 72, limit: 64 }));
        assert_eq!(r.state().written, 0);

        shm.store_u32(RING_EQ, 0, Ordering::SeqCst);
        shm.store_u32(RING_DQ, 64, Ordering::SeqCst);
        assert_eq!(r.read_vec(), Err(IpcError::BadIndex { index: 64, limit: 64 }));
        assert_eq!(r.peek_len(), Err(IpcError::BadIndex { index: 64, limit: 64 }));
    }
}
