//! Storage region descriptors and the pairing between executable and filesystem regions.
use alloc::{string::String, vec::Vec};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionRole {
    Executable,
    Filesystem,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionSlot {
    Running,
    UpdateTarget,
}

/// One entry of the device's partition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionRow {
    pub label: String,
    pub offset: u32,
    pub size: u32,
}

impl PartitionRow {
    pub fn new(label: impl Into<String>, offset: u32, size: u32) -> Self {
        Self {
            label: label.into(),
            offset,
            size,
        }
    }

    fn end(&self) -> u64 {
        self.offset as u64 + self.size as u64
    }
}

/// An executable region and the filesystem region that belongs to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionPair {
    pub executable: &'static str,
    pub filesystem: &'static str,
}

/// `app_N` boots with `data_N`. The index into this table is the boot slot number.
pub const REGION_PAIRS: [RegionPair; 2] = [
    RegionPair {
        executable: "app_0",
        filesystem: "data_0",
    },
    RegionPair {
        executable: "app_1",
        filesystem: "data_1",
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionDescriptor {
    pub role: RegionRole,
    pub slot: RegionSlot,
    pub label: String,
    pub base_address: u32,
    pub size_bytes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegionError {
    /// The pair table must hold exactly two pairs with distinct labels.
    InvalidPairTable,
    UnknownRunningExecutable(String),
    MissingPartition(String),
    EmptyPartition(String),
    Overlap(String, String),
}

impl core::fmt::Display for RegionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            RegionError::InvalidPairTable => {
                write!(f, "region pair table needs two pairs with distinct labels")
            }
            RegionError::UnknownRunningExecutable(label) => {
                write!(f, "running executable region {label} is not in the pair table")
            }
            RegionError::MissingPartition(label) => {
                write!(f, "partition {label} is not in the partition table")
            }
            RegionError::EmptyPartition(label) => write!(f, "partition {label} is empty"),
            RegionError::Overlap(a, b) => write!(f, "partitions {a} and {b} overlap"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for RegionError {}

/// The four regions an update touches, resolved once from the partition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMap {
    pub running_index: usize,
    pub target_index: usize,
    pub executable_running: RegionDescriptor,
    pub executable_target: RegionDescriptor,
    pub filesystem_running: RegionDescriptor,
    pub filesystem_target: RegionDescriptor,
}

impl RegionMap {
    /// Resolve the running and update-target regions from the label of the executable region
    /// the device is running from.
    pub fn resolve(
        pairs: &[RegionPair],
        rows: &[PartitionRow],
        running_executable: &str,
    ) -> Result<Self, RegionError> {
        if pairs.len() != 2 {
            return Err(RegionError::InvalidPairTable);
        }
        let labels: Vec<&str> = pairs
            .iter()
            .flat_map(|pair| [pair.executable, pair.filesystem])
            .collect();
        for (i, label) in labels.iter().enumerate() {
            if labels[i + 1..].contains(label) {
                return Err(RegionError::InvalidPairTable);
            }
        }

        let running_index = pairs
            .iter()
            .position(|pair| pair.executable == running_executable)
            .ok_or_else(|| RegionError::UnknownRunningExecutable(running_executable.into()))?;
        let target_index = 1 - running_index;

        let touched: Vec<&PartitionRow> = labels
            .iter()
            .map(|label| lookup(rows, label))
            .collect::<Result<_, _>>()?;
        for (i, a) in touched.iter().enumerate() {
            for b in &touched[i + 1..] {
                if (a.offset as u64) < b.end() && (b.offset as u64) < a.end() {
                    return Err(RegionError::Overlap(a.label.clone(), b.label.clone()));
                }
            }
        }

        let running = &pairs[running_index];
        let target = &pairs[target_index];
        Ok(Self {
            running_index,
            target_index,
            executable_running: describe(
                rows,
                running.executable,
                RegionRole::Executable,
                RegionSlot::Running,
            )?,
            executable_target: describe(
                rows,
                target.executable,
                RegionRole::Executable,
                RegionSlot::UpdateTarget,
            )?,
            filesystem_running: describe(
                rows,
                running.filesystem,
                RegionRole::Filesystem,
                RegionSlot::Running,
            )?,
            filesystem_target: describe(
                rows,
                target.filesystem,
                RegionRole::Filesystem,
                RegionSlot::UpdateTarget,
            )?,
        })
    }

    pub fn descriptors(&self) -> [&RegionDescriptor; 4] {
        [
            &self.executable_running,
            &self.executable_target,
            &self.filesystem_running,
            &self.filesystem_target,
        ]
    }
}

fn lookup<'r>(rows: &'r [PartitionRow], label: &str) -> Result<&'r PartitionRow, RegionError> {
    let row = rows
        .iter()
        .find(|row| row.label == label)
        .ok_or_else(|| RegionError::MissingPartition(label.into()))?;
    if row.size == 0 {
        return Err(RegionError::EmptyPartition(label.into()));
    }
    Ok(row)
}

fn describe(
    rows: &[PartitionRow],
    label: &str,
    role: RegionRole,
    slot: RegionSlot,
) -> Result<RegionDescriptor, RegionError> {
    let row = lookup(rows, label)?;
    Ok(RegionDescriptor {
        role,
        slot,
        label: row.label.clone(),
        base_address: row.offset,
        size_bytes: row.size,
    })
}
