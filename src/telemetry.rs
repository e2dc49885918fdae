//! Pool occupancy gauges.
//!
//! The crate only talks to the `metrics` facade; the host process decides
//! whether a recorder is installed and how often to sample.

use metrics::gauge;

use crate::registry::PoolRegistry;

/// Emit gauges for the current pool population (caller decides cadence).
pub fn report_pool_metrics(registry: &PoolRegistry) {
    let mut pools = 0u32;
    let mut in_use = 0u32;
    let mut free = 0u32;
    let mut reusable = 0u32;
    for (_, pool) in registry.pools() {
        pools += 1;
        in_use += pool.nr_in_use();
        free += pool.nr_free();
        reusable += pool.nr_reusable();
    }
    gauge!("ikepool_pools").set(pools as f64);
    gauge!("ikepool_leases_in_use").set(in_use as f64);
    gauge!("ikepool_leases_free").set(free as f64);
    gauge!("ikepool_leases_reusable").set(reusable as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    // No recorder installed: reporting must still be a safe no-op.
    #[test]
    fn reporting_without_a_recorder_is_harmless() {
        let mut registry = PoolRegistry::new(true);
        registry
            .install_addresspool("10.0.0.1-10.0.0.8".parse().unwrap())
            .unwrap();
        report_pool_metrics(&registry);
    }
}
