use std::fmt;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

const IPV4_LOCALHOST: [u8; 4] = [127, 0, 0, 1];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    Unix,
    Inet,
    Inet6,
    Link,
}

/// Link-layer address, laid out like BSD `sockaddr_dl`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Datalink {
    pub len: u8,
    pub family: u8,
    pub index: u16,
    pub kind: u8,
    pub nlen: u8,
    pub alen: u8,
    pub slen: u8,
    pub data: [i8; 12],
}

/// Address of an emulated endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SockAddr {
    Inet4 { port: u16, addr: [u8; 4] },
    Inet6 { port: u16, zone_id: u32, addr: [u8; 16] },
    Unix { name: String },
    Datalink(Datalink),
}

/// Borrowed, totally ordered view of a [`SockAddr`], usable as a map key
/// without cloning path names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SockAddrKey<'a> {
    Inet4(u16, [u8; 4]),
    Inet6(u16, u32, [u8; 16]),
    Unix(&'a str),
    Datalink(Datalink),
}

impl SockAddr {
    pub fn inet4(addr: [u8; 4], port: u16) -> Self {
        SockAddr::Inet4 { port, addr }
    }

    pub fn unix(name: impl Into<String>) -> Self {
        SockAddr::Unix { name: name.into() }
    }

    pub fn family(&self) -> AddressFamily {
        match self {
            SockAddr::Inet4 { .. } => AddressFamily::Inet,
            SockAddr::Inet6 { .. } => AddressFamily::Inet6,
            SockAddr::Unix { .. } => AddressFamily::Unix,
            SockAddr::Datalink(_) => AddressFamily::Link,
        }
    }

    /// Deep copy; the result shares nothing with `self`.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    pub fn key(&self) -> SockAddrKey<'_> {
        match self {
            SockAddr::Inet4 { port, addr } => SockAddrKey::Inet4(*port, *addr),
            SockAddr::Inet6 {
                port,
                zone_id,
                addr,
            } => SockAddrKey::Inet6(*port, *zone_id, *addr),
            SockAddr::Unix { name } => SockAddrKey::Unix(name.as_str()),
            SockAddr::Datalink(link) => SockAddrKey::Datalink(*link),
        }
    }

    pub fn is_ipv4_localhost(&self) -> bool {
        matches!(self, SockAddr::Inet4 { addr, .. } if *addr == IPV4_LOCALHOST)
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            SockAddr::Inet4 { port, .. } | SockAddr::Inet6 { port, .. } => Some(*port),
            SockAddr::Unix { .. } | SockAddr::Datalink(_) => None,
        }
    }

    /// Same address with another port; non-IP addresses are returned as is.
    pub fn with_port(&self, port: u16) -> Self {
        match self {
            SockAddr::Inet4 { addr, .. } => SockAddr::Inet4 { port, addr: *addr },
            SockAddr::Inet6 { zone_id, addr, .. } => SockAddr::Inet6 {
                port,
                zone_id: *zone_id,
                addr: *addr,
            },
            other => other.copy(),
        }
    }
}

impl From<SocketAddr> for SockAddr {
    fn from(value: SocketAddr) -> Self {
        match value {
            SocketAddr::V4(v4) => SockAddr::Inet4 {
                port: v4.port(),
                addr: v4.ip().octets(),
            },
            SocketAddr::V6(v6) => SockAddr::Inet6 {
                port: v6.port(),
                zone_id: v6.scope_id(),
                addr: v6.ip().octets(),
            },
        }
    }
}

impl fmt::Display for SockAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SockAddr::Inet4 { port, addr } => {
                write!(f, "{}:{port}", IpAddr::from(*addr))
            }
            SockAddr::Inet6 {
                port,
                zone_id: 0,
                addr,
            } => write!(f, "[{}]:{port}", Ipv6Addr::from(*addr)),
            SockAddr::Inet6 {
                port,
                zone_id,
                addr,
            } => write!(f, "[{}%{zone_id}]:{port}", Ipv6Addr::from(*addr)),
            SockAddr::Unix { name } => write!(f, "unix:{name}"),
            SockAddr::Datalink(link) => write!(f, "link#{}", link.index),
        }
    }
}
