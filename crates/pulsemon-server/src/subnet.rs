use ipnet::IpNet;
use pulsemon_common::error::ErrorKind;
use std::net::IpAddr;

/// Allow-list applied to the agent address on both transports.
///
/// The CIDR is parsed once at start. An unparsable value does not stop the
/// server; every request is then answered as an internal error.
#[derive(Debug, Clone)]
pub enum TrustedSubnet {
    Open,
    Net(IpNet),
    Invalid(String),
}

impl TrustedSubnet {
    pub fn parse(cidr: Option<&str>) -> Self {
        let Some(cidr) = cidr.map(str::trim).filter(|c| !c.is_empty()) else {
            return TrustedSubnet::Open;
        };
        match cidr.parse::<IpNet>() {
            Ok(net) => TrustedSubnet::Net(net),
            Err(e) => {
                tracing::warn!(cidr, error = %e, "Trusted subnet does not parse, requests will fail");
                TrustedSubnet::Invalid(cidr.to_string())
            }
        }
    }

    /// Checks the reported agent address.
    pub fn check(&self, addr: Option<&str>) -> Result<(), ErrorKind> {
        let net = match self {
            TrustedSubnet::Open => return Ok(()),
            TrustedSubnet::Invalid(_) => return Err(ErrorKind::Internal),
            TrustedSubnet::Net(net) => net,
        };
        let ip = addr
            .map(str::trim)
            .and_then(|a| a.parse::<IpAddr>().ok())
            .ok_or(ErrorKind::Forbidden)?;
        if net.contains(&ip) {
            Ok(())
        } else {
            Err(ErrorKind::Forbidden)
        }
    }
}
