/// DMA engines: serialise host↔device bulk copies, one in flight per engine.
use crate::command::{Command, CopyDirection, EngineKind};
use crate::dram::Dram;
use crate::error::SimError;
use crate::host::HostMemory;
use crate::interconnect::{TransferStats, Transport};

/// A copy decoded from a `memory_copy` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CopyRequest {
    pub src: u64,
    pub dst: u64,
    pub size: usize,
    pub direction: CopyDirection,
}

impl CopyRequest {
    pub fn from_command(command: &Command) -> Result<Self, SimError> {
        let src = command.param("src")?;
        let dst = command.param("dst")?;
        let size = command.param("size")?;
        let direction = command.params.get("direction").copied().unwrap_or(0);

        // negative addresses or sizes are out of range of any store
        let src = u64::try_from(src).map_err(|_| SimError::AddressOutOfRange {
            address: src,
            size: size.max(0) as usize,
            capacity: 0,
        })?;
        let dst = u64::try_from(dst).map_err(|_| SimError::AddressOutOfRange {
            address: dst,
            size: size.max(0) as usize,
            capacity: 0,
        })?;
        let size = usize::try_from(size).map_err(|_| SimError::AddressOutOfRange {
            address: i64::try_from(src).unwrap_or(i64::MAX),
            size: 0,
            capacity: 0,
        })?;

        Ok(CopyRequest { src, dst, size, direction: CopyDirection::from_param(direction) })
    }
}

#[derive(Debug)]
pub struct DmaEngine {
    pub id: usize,
    current: Option<CopyRequest>,
    transfers: u64,
    bytes_copied: u64,
    time_us: f64,
}

impl DmaEngine {
    pub fn new(id: usize) -> Self {
        DmaEngine { id, current: None, transfers: 0, bytes_copied: 0, time_us: 0.0 }
    }

    pub fn is_available(&self) -> bool {
        self.current.is_none()
    }

    pub fn transfers(&self) -> u64 {
        self.transfers
    }

    pub fn bytes_copied(&self) -> u64 {
        self.bytes_copied
    }

    /// Accumulated link time estimate across completed transfers.
    pub fn time_us(&self) -> f64 {
        self.time_us
    }

    /// Run the copy carried by `command` to completion.
    ///
    /// The engine is idle again when this returns, whether or not the copy
    /// succeeded. A failed copy is aborted, not retried.
    pub fn demand(
        &mut self,
        command: &Command,
        host: &mut dyn HostMemory,
        dram: &mut Dram,
        link: &dyn Transport,
    ) -> Result<TransferStats, SimError> {
        if self.current.is_some() {
            return Err(SimError::EngineBusy { kind: EngineKind::Dma, engine: self.id });
        }
        let request = CopyRequest::from_command(command)?;
        self.current = Some(request);
        let result = Self::copy(&request, host, dram, link);
        self.current = None;

        let stats = result?;
        self.transfers += 1;
        self.bytes_copied += stats.bytes;
        self.time_us += stats.time_us;
        log::debug!(
            "dma{}: {} {} bytes {:#x} -> {:#x} ({:.2} us over {})",
            self.id,
            request.direction,
            request.size,
            request.src,
            request.dst,
            stats.time_us,
            link.name()
        );
        Ok(stats)
    }

    fn copy(
        request: &CopyRequest,
        host: &mut dyn HostMemory,
        dram: &mut Dram,
        link: &dyn Transport,
    ) -> Result<TransferStats, SimError> {
        match request.direction {
            CopyDirection::HostToDevice => {
                let bytes = host.read(request.src, request.size)?;
                // validate the destination before the link is charged
                dram.load(request.dst, request.size)?;
                let stats = link.transfer(&bytes, request.dst, request.size);
                dram.store(request.dst, &bytes)?;
                Ok(stats)
            }
            CopyDirection::DeviceToHost => {
                let bytes = dram.load(request.src, request.size)?.to_vec();
                host.read(request.dst, request.size)?;
                let stats = link.transfer(&bytes, request.dst, request.size);
                host.write(request.dst, &bytes)?;
                Ok(stats)
            }
        }
    }
}
