//! A blocking socket facade over [`TcpConnection`]: a background thread
//! pumps the TUN device and advances every connection's clock, while
//! [`TcpListener`]/[`TcpStream`] give callers a `std::io`-shaped API.

use std::collections::{hash_map, HashMap, VecDeque};
use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use nix::fcntl::{fcntl, FcntlArg, OFlag};

use crate::config::TcpConfig;
use crate::connection::TcpConnection;
use crate::error::Error;
use crate::wire::{self, FourTuple};

const MTU: usize = 1500;
/// How often the background thread advances every connection's retransmission
/// clock, independent of incoming traffic.
const TICK_PERIOD: Duration = Duration::from_millis(100);

type InterfaceHandle = Arc<InterfaceManager>;

struct InterfaceManager {
    manager: Mutex<ConnectionManager>,
    pending_var: Condvar,
    receive_var: Condvar,
}

struct ConnectionManager {
    pending: HashMap<u16, VecDeque<FourTuple>>,
    connections: HashMap<FourTuple, TcpConnection>,
    cfg: TcpConfig,
    terminate: bool,
}

/// Library entry point: owns the TUN device's background thread and the
/// shared connection table it serves.
pub struct Interface {
    ih: Option<InterfaceHandle>,
    jh: Option<thread::JoinHandle<io::Result<()>>>,
}

fn packet_loop(nic: tun_tap::Iface, ih: InterfaceHandle) -> io::Result<()> {
    // The TUN fd defaults to blocking reads; switch it to non-blocking so
    // this thread can also drive the tick clock while nothing arrives.
    let flags = OFlag::from_bits_truncate(fcntl(nic.as_raw_fd(), FcntlArg::F_GETFL).map_err(io::Error::from)?);
    fcntl(nic.as_raw_fd(), FcntlArg::F_SETFL(flags | OFlag::O_NONBLOCK)).map_err(io::Error::from)?;

    let mut buf = [0u8; MTU];
    let mut last_tick = Instant::now();

    loop {
        {
            let cm = ih.manager.lock().unwrap();
            if cm.terminate {
                return Ok(());
            }
        }

        match nic.recv(&mut buf[..]) {
            Ok(nbytes) => handle_datagram(&ih, &nic, &buf[..nbytes]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => return Err(e),
        }

        let elapsed = last_tick.elapsed();
        if elapsed >= TICK_PERIOD {
            last_tick = Instant::now();
            tick_all(&ih, &nic, elapsed.as_millis() as u64);
        } else {
            thread::sleep(Duration::from_millis(5));
        }
    }
}

fn handle_datagram(ih: &InterfaceHandle, nic: &tun_tap::Iface, datagram: &[u8]) {
    let parsed = match wire::parse_ipv4_tcp(datagram) {
        Some(p) => p,
        None => return,
    };

    let mut cm_guard = ih.manager.lock().unwrap();
    let cm = &mut *cm_guard;

    match cm.connections.entry(parsed.tuple) {
        hash_map::Entry::Occupied(mut entry) => {
            let conn = entry.get_mut();
            conn.segment_received(&parsed.segment);
            flush_outbound(conn, nic, parsed.tuple.reversed());
            drop(cm_guard);
            ih.receive_var.notify_all();
        }
        hash_map::Entry::Vacant(e) => {
            let dstp = parsed.tuple.dst.1;
            if parsed.segment.syn() && cm.pending.contains_key(&dstp) {
                let mut conn = TcpConnection::new(cm.cfg, None);
                conn.segment_received(&parsed.segment);
                flush_outbound(&mut conn, nic, parsed.tuple.reversed());
                e.insert(conn);
                cm.pending.get_mut(&dstp).unwrap().push_back(parsed.tuple);
                drop(cm_guard);
                ih.pending_var.notify_all();
            }
        }
    }
}

fn tick_all(ih: &InterfaceHandle, nic: &tun_tap::Iface, ms: u64) {
    let mut cm = ih.manager.lock().unwrap();
    let mut done = Vec::new();
    for (tuple, conn) in cm.connections.iter_mut() {
        conn.tick(ms);
        flush_outbound(conn, nic, tuple.reversed());
        if !conn.active() {
            done.push(*tuple);
        }
    }
    for tuple in done {
        cm.connections.remove(&tuple);
    }
}

fn flush_outbound(conn: &mut TcpConnection, nic: &tun_tap::Iface, reply_tuple: FourTuple) {
    while let Some(seg) = conn.pop_segment_out() {
        let bytes = wire::build_ipv4_tcp(reply_tuple, &seg);
        if let Err(e) = nic.send(&bytes) {
            log::warn!("failed to write segment to TUN device: {e}");
        }
    }
}

impl Interface {
    pub fn new(cfg: TcpConfig) -> Result<Self, Error> {
        let nic = tun_tap::Iface::without_packet_info("tun0", tun_tap::Mode::Tun)
            .map_err(|e| Error::Tun(e.to_string()))?;
        let ih: InterfaceHandle = Arc::new(InterfaceManager {
            manager: Mutex::new(ConnectionManager {
                pending: HashMap::new(),
                connections: HashMap::new(),
                cfg,
                terminate: false,
            }),
            pending_var: Condvar::new(),
            receive_var: Condvar::new(),
        });

        let jh = {
            let ih = ih.clone();
            Some(thread::spawn(move || packet_loop(nic, ih)))
        };

        Ok(Interface { ih: Some(ih), jh })
    }

    pub fn bind(&mut self, port: u16) -> Result<TcpListener, Error> {
        let ih = self.ih.as_ref().unwrap().clone();
        let mut cm = ih.manager.lock().unwrap();
        match cm.pending.entry(port) {
            hash_map::Entry::Vacant(v) => {
                v.insert(VecDeque::new());
            }
            hash_map::Entry::Occupied(_) => {
                return Err(Error::PortInUse(port));
            }
        }
        drop(cm);
        Ok(TcpListener { ih, port })
    }
}

impl Drop for Interface {
    fn drop(&mut self) {
        self.ih.as_ref().unwrap().manager.lock().unwrap().terminate = true;
        self.jh
            .take()
            .expect("interface dropped twice")
            .join()
            .unwrap()
            .unwrap();
    }
}

pub struct TcpListener {
    ih: InterfaceHandle,
    port: u16,
}

impl TcpListener {
    pub fn accept(&mut self) -> Result<TcpStream, Error> {
        let mut cm = self.ih.manager.lock().unwrap();
        loop {
            if let Some(tuple) = cm
                .pending
                .get_mut(&self.port)
                .expect("port closed while listener is active")
                .pop_front()
            {
                return Ok(TcpStream { ih: self.ih.clone(), tuple });
            }
            cm = self.ih.pending_var.wait(cm).unwrap();
        }
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        let mut cm = self.ih.manager.lock().unwrap();
        cm.pending.remove(&self.port);
    }
}

pub struct TcpStream {
    ih: InterfaceHandle,
    tuple: FourTuple,
}

impl io::Read for TcpStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut cm = self.ih.manager.lock().unwrap();
        loop {
            let conn = cm
                .connections
                .get_mut(&self.tuple)
                .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"))?;

            if conn.inbound_stream().eof() {
                return Ok(0);
            }
            if conn.inbound_stream().buffer_size() > 0 {
                let data = conn.inbound_stream_mut().read(buf.len());
                buf[..data.len()].copy_from_slice(&data);
                return Ok(data.len());
            }
            if conn.inbound_stream().error() {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"));
            }

            cm = self.ih.receive_var.wait(cm).unwrap();
        }
    }
}

impl io::Write for TcpStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut cm = self.ih.manager.lock().unwrap();
        let conn = cm
            .connections
            .get_mut(&self.tuple)
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "connection closed"))?;
        Ok(conn.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl TcpStream {
    /// Half-close: no more bytes will ever be written on this stream.
    pub fn shutdown_write(&self) -> Result<(), Error> {
        let mut cm = self.ih.manager.lock().unwrap();
        let conn = cm
            .connections
            .get_mut(&self.tuple)
            .ok_or(Error::ConnectionClosed)?;
        conn.end_input_stream();
        Ok(())
    }
}

impl Drop for TcpStream {
    /// The caller discarded the stream without a clean close. If the
    /// connection is still active, stamp it reset so its next drain (the
    /// background thread's own tick, which flushes every connection's
    /// `segments_out` to the TUN device before removing anything inactive)
    /// carries the peer a RST instead of leaving it to time out.
    fn drop(&mut self) {
        let mut cm = self.ih.manager.lock().unwrap();
        if let Some(conn) = cm.connections.get_mut(&self.tuple) {
            if conn.active() {
                log::warn!("TcpStream dropped with an active connection, resetting it");
                conn.close();
            }
        }
    }
}
