//! Sizing helpers deriving database memory settings from container resources.

use std::str::FromStr;

use kubeblocks_shared::quantity::{CpuQuantity, MemoryQuantity, ParseQuantityError};
use serde_json::Value;

/// The smallest buffer pool handed out, in MB.
const MIN_BUFFER_SIZE_MB: i64 = 128;

/// The memory always kept free for the database process itself, in MB.
const RESERVED_BASE_MB: i64 = 2304;

/// The memory reserved per core, in MB.
const RESERVED_PER_CORE_MB: i64 = 8;

/// The memory `resource` of the `kind` (`limits` or `requests`) of a container, [`None`] if it
/// is not set.
pub(crate) fn container_memory(
    container: &Value,
    kind: &str,
) -> Result<Option<MemoryQuantity>, ParseQuantityError> {
    resource_quantity(container, kind, "memory")
        .map(MemoryQuantity::from_str)
        .transpose()
}

/// The CPU limit of a container, [`None`] if it is not set.
pub(crate) fn container_cpu(container: &Value) -> Result<Option<CpuQuantity>, ParseQuantityError> {
    resource_quantity(container, "limits", "cpu")
        .map(CpuQuantity::from_str)
        .transpose()
}

/// Parses a storage quantity like `10Gi` into bytes.
pub(crate) fn storage_bytes(quantity: &str) -> Result<u64, ParseQuantityError> {
    MemoryQuantity::from_str(quantity).map(|size| size.as_bytes())
}

fn resource_quantity<'a>(container: &'a Value, kind: &str, resource: &str) -> Option<&'a str> {
    container
        .get("resources")?
        .get(kind)?
        .get(resource)?
        .as_str()
}

/// Recommends the size of the InnoDB buffer pool for a container with the given memory and
/// cores.
///
/// A fixed amount of memory plus 3% of the memory and 8MB per core is reserved for the database
/// process, 75% of the remaining memory go to the buffer pool. Pools of 1GB and more are aligned
/// to 1GB, smaller pools to 128MB. Shared instances skip the reservation, as the memory of the
/// process is accounted elsewhere.
pub fn buffer_pool_size(memory: Option<MemoryQuantity>, cores: u64, shared: bool) -> String {
    let Some(memory) = memory else {
        return format!("{MIN_BUFFER_SIZE_MB}M");
    };
    let memory_mb = memory.as_mebi() as i64;
    if memory_mb <= 1024 || cores == 0 {
        return format!("{MIN_BUFFER_SIZE_MB}M");
    }

    let reserved = if shared {
        0
    } else {
        RESERVED_BASE_MB + memory_mb * 3 / 100 + cores as i64 * RESERVED_PER_CORE_MB
    };
    let pool = (memory_mb - reserved) * 3 / 4;

    let aligned = if pool >= 1024 {
        pool / 1024 * 1024
    } else if pool > MIN_BUFFER_SIZE_MB {
        pool / MIN_BUFFER_SIZE_MB * MIN_BUFFER_SIZE_MB
    } else {
        MIN_BUFFER_SIZE_MB
    };
    format!("{aligned}M")
}

/// Recommends `shared_buffers` for PostgreSQL: a quarter of the memory, aligned to 128MB.
pub fn shared_buffers(memory: Option<MemoryQuantity>) -> String {
    let quarter = memory.map_or(0, |memory| memory.as_mebi() as i64 / 4);
    let aligned = (quarter / MIN_BUFFER_SIZE_MB * MIN_BUFFER_SIZE_MB).max(MIN_BUFFER_SIZE_MB);
    format!("{aligned}MB")
}
