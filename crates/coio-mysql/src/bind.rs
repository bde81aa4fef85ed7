//! Bind buffers for prepared statements.
//!
//! Every parameter scratch block and every result slot holds a token from
//! the connection's [`BindLedger`], so the number of live buffers can be
//! observed from outside. Buffers are allocated with `try_reserve_exact`:
//! an allocation failure is reported as [`Error::Allocation`] instead of
//! aborting the process.

use crate::client::ParamBind;
use crate::types::FieldType;
use coio_core::{Error, Param};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Counts bind buffers that are currently alive.
#[derive(Debug, Clone, Default)]
pub struct BindLedger {
    live: Arc<AtomicUsize>,
}

impl BindLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffers allocated and not yet freed.
    pub fn outstanding(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    fn token(&self) -> BindToken {
        self.live.fetch_add(1, Ordering::AcqRel);
        BindToken {
            live: Arc::clone(&self.live),
        }
    }
}

#[derive(Debug)]
struct BindToken {
    live: Arc<AtomicUsize>,
}

impl Drop for BindToken {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
    }
}

pub(crate) fn zeroed(what: &'static str, len: usize) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|e| Error::allocation(what, len, e))?;
    buf.resize(len, 0);
    Ok(buf)
}

/// One output column's receive buffer with its length and null indicators.
#[derive(Debug)]
pub struct ResultSlot {
    buffer: Vec<u8>,
    length: usize,
    is_null: bool,
    _token: BindToken,
}

impl ResultSlot {
    /// Allocate a slot able to hold `capacity` bytes.
    pub fn allocate(ledger: &BindLedger, capacity: usize) -> Result<Self, Error> {
        let buffer = zeroed("result buffer", capacity)?;
        Ok(Self {
            buffer,
            length: 0,
            is_null: false,
            _token: ledger.token(),
        })
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Buffer the library writes the value into.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Full length of the last value, which may exceed the capacity.
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn set_length(&mut self, length: usize) {
        self.length = length;
    }

    pub fn is_null(&self) -> bool {
        self.is_null
    }

    pub fn set_null(&mut self, is_null: bool) {
        self.is_null = is_null;
    }

    /// Write a fetched value the way the library does: copy what fits,
    /// record the full length and the null indicator.
    pub fn store(&mut self, value: Option<&[u8]>) {
        match value {
            Some(bytes) => {
                let n = bytes.len().min(self.buffer.len());
                self.buffer[..n].copy_from_slice(&bytes[..n]);
                self.length = bytes.len();
                self.is_null = false;
            }
            None => {
                self.length = 0;
                self.is_null = true;
            }
        }
    }

    /// Did the last value not fit?
    pub fn is_truncated(&self) -> bool {
        !self.is_null && self.length > self.buffer.len()
    }

    /// The received bytes, clipped to the capacity; `None` for NULL.
    pub fn payload(&self) -> Option<&[u8]> {
        if self.is_null {
            return None;
        }
        let n = self.length.min(self.buffer.len());
        Some(&self.buffer[..n])
    }
}

/// Fixed-width scratch storage for boolean and numeric parameters.
///
/// One 8-byte slot per placeholder, allocated as a single block.
#[derive(Debug)]
pub struct ParamScratch {
    slots: Vec<[u8; 8]>,
    _token: BindToken,
}

impl ParamScratch {
    pub fn allocate(ledger: &BindLedger, count: usize) -> Result<Self, Error> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(count)
            .map_err(|e| Error::allocation("parameter buffer", count.saturating_mul(8), e))?;
        slots.resize(count, [0; 8]);
        Ok(Self {
            slots,
            _token: ledger.token(),
        })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Encode `params` into one bind per placeholder. Placeholders without a
    /// matching parameter bind NULL; parameters beyond the placeholder count
    /// are ignored.
    pub fn bind<'a>(&'a mut self, params: &'a [Param]) -> Vec<ParamBind<'a>> {
        for (slot, param) in self.slots.iter_mut().zip(params) {
            match param {
                Param::Bool(b) => slot[0] = u8::from(*b),
                Param::Number(n) => *slot = n.to_ne_bytes(),
                Param::Null | Param::Bytes(_) => {}
            }
        }

        let slots = &self.slots;
        slots
            .iter()
            .enumerate()
            .map(|(i, slot)| match params.get(i) {
                None | Some(Param::Null) => ParamBind::null(),
                Some(Param::Bool(_)) => ParamBind {
                    buffer_type: FieldType::Tiny,
                    buffer: &slot[..1],
                    is_null: false,
                },
                Some(Param::Number(_)) => ParamBind {
                    buffer_type: FieldType::Double,
                    buffer: &slot[..],
                    is_null: false,
                },
                Some(Param::Bytes(bytes)) => ParamBind {
                    buffer_type: FieldType::String,
                    buffer: bytes,
                    is_null: false,
                },
            })
            .collect()
    }
}
