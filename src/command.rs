/// Host-issued commands and the engine classes that serve them.
use crate::error::SimError;
use crate::kernel::KernelDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

pub const MEMORY_COPY: &str = "memory_copy";
pub const KERNEL_LAUNCH: &str = "kernel_launch";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EngineKind {
    Dma,
    Ace,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineKind::Dma => write!(f, "DMA"),
            EngineKind::Ace => write!(f, "ACE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    MemoryCopy,
    KernelLaunch,
}

impl CommandKind {
    /// The engine class a command of this kind is routed to.
    pub fn engine(self) -> EngineKind {
        match self {
            CommandKind::MemoryCopy   => EngineKind::Dma,
            CommandKind::KernelLaunch => EngineKind::Ace,
        }
    }
}

impl FromStr for CommandKind {
    type Err = SimError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            MEMORY_COPY => Ok(CommandKind::MemoryCopy),
            KERNEL_LAUNCH => Ok(CommandKind::KernelLaunch),
            other => Err(SimError::UnknownCommandType { tag: other.to_string() }),
        }
    }
}

/// Which way a memory copy moves bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyDirection {
    HostToDevice,
    DeviceToHost,
}

impl CopyDirection {
    /// Decode the `direction` parameter: 0 host→device, anything else device→host.
    pub fn from_param(value: i64) -> Self {
        if value == 0 {
            CopyDirection::HostToDevice
        } else {
            CopyDirection::DeviceToHost
        }
    }

    pub fn as_param(self) -> i64 {
        match self {
            CopyDirection::HostToDevice => 0,
            CopyDirection::DeviceToHost => 1,
        }
    }
}

impl std::fmt::Display for CopyDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CopyDirection::HostToDevice => write!(f, "host->device"),
            CopyDirection::DeviceToHost => write!(f, "device->host"),
        }
    }
}

/// A tagged command with an integer parameter map. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(rename = "type")]
    pub tag: String,
    #[serde(default)]
    pub params: BTreeMap<String, i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kernel: Option<KernelDescriptor>,
}

impl Command {
    pub fn memory_copy(src: u64, dst: u64, size: usize, direction: CopyDirection) -> Self {
        let mut params = BTreeMap::new();
        params.insert("src".to_string(), i64::try_from(src).unwrap_or(i64::MAX));
        params.insert("dst".to_string(), i64::try_from(dst).unwrap_or(i64::MAX));
        params.insert("size".to_string(), i64::try_from(size).unwrap_or(i64::MAX));
        params.insert("direction".to_string(), direction.as_param());
        Command { tag: MEMORY_COPY.to_string(), params, kernel: None }
    }

    pub fn kernel_launch(descriptor: KernelDescriptor) -> Self {
        Command {
            tag: KERNEL_LAUNCH.to_string(),
            params: BTreeMap::new(),
            kernel: Some(descriptor),
        }
    }

    /// A command with an arbitrary tag, as a command generator might emit it.
    pub fn raw(tag: &str, params: BTreeMap<String, i64>) -> Self {
        Command { tag: tag.to_string(), params, kernel: None }
    }

    pub fn kind(&self) -> Result<CommandKind, SimError> {
        self.tag.parse()
    }

    pub fn param(&self, name: &'static str) -> Result<i64, SimError> {
        self.params
            .get(name)
            .copied()
            .ok_or(SimError::MissingParameter { name })
    }

    pub fn descriptor(&self) -> Result<&KernelDescriptor, SimError> {
        self.kernel
            .as_ref()
            .ok_or(SimError::MissingParameter { name: "kernel" })
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kernel {
            Some(kernel) => write!(f, "{}({})", self.tag, kernel.name),
            None => write!(f, "{}{:?}", self.tag, self.params),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::{Instruction, Program};
    use crate::kernel::Dim3;

    #[test]
    fn tags_parse_to_kinds() {
        let copy = Command::memory_copy(0, 64, 16, CopyDirection::HostToDevice);
        assert_eq!(copy.kind().unwrap(), CommandKind::MemoryCopy);
        assert_eq!(copy.kind().unwrap().engine(), EngineKind::Dma);
        assert_eq!(copy.param("dst").unwrap(), 64);

        let bogus = Command::raw("reset", BTreeMap::new());
        assert_eq!(
            bogus.kind(),
            Err(SimError::UnknownCommandType { tag: "reset".to_string() })
        );
    }

    #[test]
    fn missing_parameters_are_reported() {
        let command = Command::raw(MEMORY_COPY, BTreeMap::new());
        assert_eq!(command.param("src"), Err(SimError::MissingParameter { name: "src" }));
        assert_eq!(
            command.descriptor().unwrap_err(),
            SimError::MissingParameter { name: "kernel" }
        );
    }

    #[test]
    fn workload_json_deserializes() {
        let json = r#"[
            {"type": "memory_copy", "params": {"src": 0, "dst": 4096, "size": 256, "direction": 0}},
            {"type": "kernel_launch", "kernel": {
                "name": "scale",
                "grid": {"x": 2, "y": 1, "z": 1},
                "workgroup_size": {"x": 256, "y": 1, "z": 1},
                "program": {"base": 0, "instructions": [{"op": "vector_alu"}]}
            }}
        ]"#;
        let commands: Vec<Command> = serde_json::from_str(json).unwrap();
        assert_eq!(commands[0].kind().unwrap(), CommandKind::MemoryCopy);
        let descriptor = commands[1].descriptor().unwrap();
        assert_eq!(descriptor.name, "scale");
        assert_eq!(descriptor.num_workgroups(), 2);
        assert_eq!(
            *descriptor.program,
            Program::new(0, vec![Instruction::VectorAlu])
        );
        assert_eq!(descriptor.grid, Dim3::x(2));
    }
}
