//! Address block derivation and enumeration for non-cloud addresses.

use std::net::IpAddr;
use ipnetwork::IpNetwork;
use tracing::debug;
use crate::config::ExpandConfig;
use crate::errors::ReconError;
use crate::tools::ToolKind;

/// The block to expand around `ip`.
///
/// A block reported by the classifier sets the prefix length; the block is
/// always the one holding `ip`, so `10.0.0.0/30` reported for `10.0.0.5`
/// yields `10.0.0.4/30`. Without a usable report, `ip` is masked with the
/// configured prefix.
pub fn derive_block(
    ip: IpAddr,
    reported: Option<IpNetwork>,
    config: &ExpandConfig,
) -> Result<IpNetwork, ReconError> {
    if let Some(block) = reported {
        if block.contains(ip) {
            return canonical(block);
        }
        if block.is_ipv4() == ip.is_ipv4() {
            let rebased = IpNetwork::new(ip, block.prefix())
                .map_err(|e| ReconError::Internal(format!("block {} around {}: {}", block, ip, e)))?;
            debug!(%ip, %block, %rebased, "Reported block does not contain address, applying its prefix");
            return canonical(rebased);
        }
        debug!(%ip, %block, "Reported block is of another family, using configured prefix");
    }
    let prefix = match ip {
        IpAddr::V4(_) => config.ipv4_prefix,
        IpAddr::V6(_) => config.ipv6_prefix,
    };
    let block = IpNetwork::new(ip, prefix)
        .map_err(|e| ReconError::Config(format!("invalid prefix /{} for {}: {}", prefix, ip, e)))?;
    canonical(block)
}

/// Same block, addressed by its network address.
fn canonical(block: IpNetwork) -> Result<IpNetwork, ReconError> {
    IpNetwork::new(block.network(), block.prefix())
        .map_err(|e| ReconError::Internal(format!("block {}: {}", block, e)))
}

/// Number of addresses in the block, network and broadcast included.
pub fn block_size(block: &IpNetwork) -> u128 {
    let host_bits = match block {
        IpNetwork::V4(net) => 32 - u32::from(net.prefix()),
        IpNetwork::V6(net) => 128 - u32::from(net.prefix()),
    };
    if host_bits >= 128 {
        u128::MAX
    } else {
        1u128 << host_bits
    }
}

/// Every address in `block`. Blocks above `max_size` are a parse failure
/// against the classifier output that produced them.
pub fn enumerate_block(block: &IpNetwork, max_size: u64) -> Result<Vec<IpAddr>, ReconError> {
    let size = block_size(block);
    if size > u128::from(max_size) {
        return Err(ReconError::parse(
            ToolKind::Classifier.as_str(),
            format!("block {} holds {} addresses, above the limit of {}", block, size, max_size),
        ));
    }
    let addresses: Vec<IpAddr> = match block {
        IpNetwork::V4(net) => net.iter().map(IpAddr::V4).collect(),
        IpNetwork::V6(net) => net.iter().map(IpAddr::V6).collect(),
    };
    Ok(addresses)
}

/// Private, loopback and link-local space.
pub fn is_private(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_loopback() || v4.is_link_local(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}
