//! Listens on a TCP port over a TUN device and echoes back whatever it
//! receives, exercising the full connection state machine end to end.

use std::io::{Read, Write};

use tcprs::{Interface, TcpConfig};

fn main() {
    env_logger::init();

    let port: u16 = std::env::args()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or(9000);

    let mut iface = Interface::new(TcpConfig::default()).expect("failed to open tun0");
    let mut listener = iface.bind(port).expect("failed to bind port");
    log::info!("listening on tun0:{port}");

    loop {
        let mut stream = match listener.accept() {
            Ok(s) => s,
            Err(e) => {
                log::error!("accept failed: {e}");
                continue;
            }
        };
        log::info!("accepted a connection");

        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) => {
                        log::info!("peer closed, shutting down");
                        let _ = stream.shutdown_write();
                        break;
                    }
                    Ok(n) => {
                        if let Err(e) = stream.write_all(&buf[..n]) {
                            log::error!("write failed: {e}");
                            break;
                        }
                    }
                    Err(e) => {
                        log::error!("read failed: {e}");
                        break;
                    }
                }
            }
        });
    }
}
