pub mod partition;
pub mod pool;

pub use partition::{split, ShardManifests};
pub use pool::{run_shard, WorkerEvent, WorkerPool, WorkerSetup};
