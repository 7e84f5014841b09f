/*
 * Copyright (c) 2025 Dylan Storey
 * Licensed under the Elastic License 2.0.
 * See LICENSE file in the project root for full license text.
 */

//! Redis key layout. Everything Tom writes lives under the `tom:` namespace
//! except the response cache, whose prefix is configurable.

/// The list workers block on for new job ids.
pub const QUEUE: &str = "tom:queue";

/// Set of job ids currently in ACTIVE state, maintained for the supervisor
/// sweep.
pub const ACTIVE_SET: &str = "tom:jobs:active";

/// Stream of failed command executions.
pub const FAILED_STREAM: &str = "tom:failed_commands";

pub fn job(job_id: &str) -> String {
    format!("tom:job:{}", job_id)
}

pub fn job_heartbeat(job_id: &str) -> String {
    format!("tom:job:heartbeat:{}", job_id)
}

pub fn worker_heartbeat(worker_id: &str) -> String {
    format!("tom:worker:heartbeat:{}", worker_id)
}

pub const WORKER_HEARTBEAT_PATTERN: &str = "tom:worker:heartbeat:*";

pub fn device_lease(device_key: &str) -> String {
    format!("tom:device_lease:{}", device_key)
}

pub fn device_stats(device: &str) -> String {
    format!("tom:stats:device:{}", device)
}

pub const DEVICE_STATS_PATTERN: &str = "tom:stats:device:*";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(job("abc"), "tom:job:abc");
        assert_eq!(job_heartbeat("abc"), "tom:job:heartbeat:abc");
        assert_eq!(device_lease("rtr1:22"), "tom:device_lease:rtr1:22");
        assert_eq!(device_stats("rtr1"), "tom:stats:device:rtr1");
    }
}
