//! Node selection for join requests

use crate::error::{Error, Result};
use crate::types::{RelayAddress, RelayStats, Region};

/// Pick the least loaded node, preferring nodes in `region`.
///
/// Load is the connected client count. Falls back to the least loaded node
/// overall when no node is in `region`; on ties the earlier entry wins.
pub fn select_node(
    snapshot: &[(RelayAddress, RelayStats)],
    region: Region,
) -> Result<&RelayAddress> {
    let mut lowest: Option<&(RelayAddress, RelayStats)> = None;
    let mut lowest_in_region: Option<&(RelayAddress, RelayStats)> = None;

    for entry in snapshot {
        let load = entry.1.connected_clients;

        if lowest.map_or(true, |(_, best)| load < best.connected_clients) {
            lowest = Some(entry);
        }
        if entry.0.region == region
            && lowest_in_region.map_or(true, |(_, best)| load < best.connected_clients)
        {
            lowest_in_region = Some(entry);
        }
    }

    lowest_in_region
        .or(lowest)
        .map(|(address, _)| address)
        .ok_or(Error::NoNodesAvailable)
}
