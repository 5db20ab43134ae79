use ipnet::IpNet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("not a valid network CIDR: {0:?}")]
pub struct NotValidCidr(String);

/// Parses `s` as a network range in `address/prefix` form.
pub fn validate(s: &str) -> Result<IpNet, NotValidCidr> {
    s.parse().map_err(|_| NotValidCidr(s.to_string()))
}

/// Returns the first host address of the network described by `s`.
pub fn first_usable_address(s: &str) -> Result<IpAddr, NotValidCidr> {
    validate(s).map(|net| first_host(&net))
}

/// Returns the network address incremented by one.
///
/// A single-address network has no address past its network address, in which
/// case the network address itself is returned.
pub fn first_host(net: &IpNet) -> IpAddr {
    match net {
        IpNet::V4(net) => {
            let next = Ipv4Addr::from(u32::from(net.network()).wrapping_add(1));
            if net.contains(&next) {
                next.into()
            } else {
                net.network().into()
            }
        }
        IpNet::V6(net) => {
            let next = Ipv6Addr::from(u128::from(net.network()).wrapping_add(1));
            if net.contains(&next) {
                next.into()
            } else {
                net.network().into()
            }
        }
    }
}
