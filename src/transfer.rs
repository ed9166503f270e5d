//! Bulk memory writes.
//!
//! A buffer is split into `MAX_CHUNK` byte write memory requests followed by a
//! final request carrying the remainder. The final request is always sent,
//! even when the remainder is empty.

use embedded_hal::blocking::delay::DelayMs;

use crate::protocol::{Invalid, MAX_CHUNK};
use crate::{Error, Programmer, Rejection, SerialPort};

/// One write memory request of a bulk transfer
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Chunk {
    /// Position in the transfer, starting at 0
    pub index: usize,
    /// Destination address
    pub address: u32,
    /// Offset into the source buffer
    pub offset: usize,
    pub len: usize,
    /// Set on the remainder chunk
    pub last: bool,
}

/// Buffer to be written to device memory
#[derive(Clone, Debug)]
pub struct WriteJob<'a> {
    address: u32,
    data: &'a [u8],
}

impl<'a> WriteJob<'a> {
    pub fn new(address: u32, data: &'a [u8]) -> Result<Self, Invalid> {
        if address as u64 + data.len() as u64 > u32::MAX as u64 + 1 {
            return Err(Invalid::AddressOverflow {
                address,
                len: data.len(),
            });
        }

        Ok(Self { address, data })
    }

    /// Number of full size chunks
    pub fn full_chunks(&self) -> usize {
        self.data.len() / MAX_CHUNK
    }

    /// Size of the final chunk
    pub fn remainder(&self) -> usize {
        self.data.len() % MAX_CHUNK
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Planned chunks in transmission order
    pub fn chunks(&self) -> impl Iterator<Item = Chunk> + '_ {
        let full = self.full_chunks();

        (0..=full).map(move |index| {
            let offset = index * MAX_CHUNK;
            let len = if index == full { self.remainder() } else { MAX_CHUNK };

            Chunk {
                index,
                address: self.address.wrapping_add(offset as u32),
                offset,
                len,
                last: index == full,
            }
        })
    }

    pub fn data(&self, chunk: &Chunk) -> &'a [u8] {
        &self.data[chunk.offset..chunk.offset + chunk.len]
    }
}

impl<P, D, E> Programmer<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    /// Write `data` to memory starting at `address`
    pub fn send_file(&mut self, address: u32, data: &[u8]) -> Result<usize, Error<E>> {
        self.send_file_with(address, data, |_| ())
    }

    /// Write `data` to memory, calling `progress` after each accepted chunk.
    ///
    /// Stops at the first rejected chunk, chunks already written are left in place.
    pub fn send_file_with<F>(
        &mut self,
        address: u32,
        data: &[u8],
        mut progress: F,
    ) -> Result<usize, Error<E>>
    where
        F: FnMut(&Chunk),
    {
        let job = WriteJob::new(address, data).map_err(Error::Invalid)?;
        self.ensure_connected()?;

        info!(
            "Writing {} bytes at 0x{:08x} ({} chunks + {} bytes)",
            job.len(),
            address,
            job.full_chunks(),
            job.remainder()
        );

        let mut written = 0;
        for chunk in job.chunks() {
            debug!("Chunk {} at 0x{:08x} ({} bytes)", chunk.index, chunk.address, chunk.len);

            let reason = match self.write_mem(chunk.address, job.data(&chunk)) {
                Ok(()) => {
                    written += chunk.len;
                    progress(&chunk);
                    continue;
                }
                Err(e) => Rejection::from_error(e),
            };

            error!("Chunk {} at 0x{:08x} rejected: {}", chunk.index, chunk.address, reason);
            return Err(Error::Chunk {
                index: chunk.index,
                address: chunk.address,
                reason,
            });
        }

        Ok(written)
    }
}
