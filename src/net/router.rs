//! Longest-prefix-match IPv4 routing over a binary trie, fanning out to a
//! set of owned [`NetworkInterface`]s.

use std::net::Ipv4Addr;

use crate::net::interface::NetworkInterface;

/// A route: `prefix/prefix_length` reached via `next_hop` (or directly, if
/// `None`) out of interface `interface_num`.
#[derive(Debug, Clone, Copy)]
pub struct RouteEntry {
    pub prefix: u32,
    pub prefix_length: u8,
    pub next_hop: Option<Ipv4Addr>,
    pub interface_num: usize,
}

/// One node of the binary trie, indexed into an arena `Vec` rather than
/// linked via pointers: `children[0]`/`children[1]` are indices of the
/// 0-bit/1-bit child, and `route` is the most specific entry whose prefix
/// ends exactly at this node.
#[derive(Debug, Default)]
struct TrieNode {
    children: [Option<usize>; 2],
    route: Option<RouteEntry>,
}

/// A binary trie over 32-bit prefixes, used for longest-prefix-match
/// routing. Nodes live in a flat arena; the root is always index 0.
#[derive(Debug)]
struct Trie {
    nodes: Vec<TrieNode>,
    default_route: Option<RouteEntry>,
}

impl Trie {
    fn new() -> Self {
        Trie {
            nodes: vec![TrieNode::default()],
            default_route: None,
        }
    }

    fn insert(&mut self, entry: RouteEntry) {
        if entry.prefix_length == 0 {
            self.default_route = Some(entry);
            return;
        }

        let mut node = 0;
        for bit in 0..entry.prefix_length {
            let shift = 31 - bit;
            let b = ((entry.prefix >> shift) & 1) as usize;
            node = match self.nodes[node].children[b] {
                Some(child) => child,
                None => {
                    self.nodes.push(TrieNode::default());
                    let child = self.nodes.len() - 1;
                    self.nodes[node].children[b] = Some(child);
                    child
                }
            };
        }
        self.nodes[node].route = Some(entry);
    }

    /// The most specific route whose prefix matches `ip`, falling back to
    /// the default route if nothing more specific matched.
    fn longest_prefix_match(&self, ip: Ipv4Addr) -> Option<RouteEntry> {
        let ip = u32::from(ip);
        let mut node = 0;
        let mut best = self.default_route;

        for bit in 0..32 {
            if let Some(route) = self.nodes[node].route {
                best = Some(route);
            }
            let shift = 31 - bit;
            let b = ((ip >> shift) & 1) as usize;
            match self.nodes[node].children[b] {
                Some(child) => node = child,
                None => return best,
            }
        }
        if let Some(route) = self.nodes[node].route {
            best = Some(route);
        }
        best
    }
}

/// Owns a set of interfaces and the route table directing datagrams between
/// them, decrementing TTL and dropping anything that would expire.
pub struct Router {
    interfaces: Vec<NetworkInterface>,
    routes: Trie,
}

impl Router {
    pub fn new() -> Self {
        Router {
            interfaces: Vec::new(),
            routes: Trie::new(),
        }
    }

    pub fn add_interface(&mut self, interface: NetworkInterface) -> usize {
        self.interfaces.push(interface);
        self.interfaces.len() - 1
    }

    pub fn interface_mut(&mut self, index: usize) -> &mut NetworkInterface {
        &mut self.interfaces[index]
    }

    pub fn add_route(
        &mut self,
        prefix: Ipv4Addr,
        prefix_length: u8,
        next_hop: Option<Ipv4Addr>,
        interface_num: usize,
    ) {
        self.routes.insert(RouteEntry {
            prefix: u32::from(prefix),
            prefix_length,
            next_hop,
            interface_num,
        });
    }

    pub fn route(&self, destination: Ipv4Addr) -> Option<RouteEntry> {
        self.routes.longest_prefix_match(destination)
    }

    /// Route one IPv4 datagram: look up the destination, decrement TTL
    /// (dropping it if that would bring TTL to 0 or below), and hand it to
    /// the outgoing interface via ARP-resolved send.
    ///
    /// `ttl` and `destination` are pulled from the datagram by the caller
    /// (an `Ipv4HeaderSlice` parse) since this module has no IP header
    /// codec of its own.
    pub fn route_one_datagram(&mut self, datagram: &[u8], destination: Ipv4Addr, ttl: u8) -> bool {
        let route = match self.route(destination) {
            Some(r) => r,
            None => return false,
        };
        if ttl <= 1 {
            return false;
        }
        let next_hop = route.next_hop.unwrap_or(destination);
        self.interfaces[route.interface_num].send_datagram(datagram, next_hop);
        true
    }

    pub fn tick(&mut self, ms: u64) {
        for iface in self.interfaces.iter_mut() {
            iface.tick(ms);
        }
    }
}

impl Default for Router {
    fn default() -> Self {
        Router::new()
    }
}
