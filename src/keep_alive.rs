use std::{
    io::{Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    thread,
    time::Duration,
};

use anyhow::{Context, Result};
use log::{debug, info, warn};

const RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 5\r\nConnection: close\r\n\r\nalive";

/// binds `addr` and answers every HTTP request with `200 alive` on a detached
/// thread. Returns the bound address.
pub fn spawn(addr: SocketAddr) -> Result<SocketAddr> {
    let listener =
        TcpListener::bind(addr).with_context(|| format!("failed to bind keep-alive on {}", addr))?;
    let local_addr = listener.local_addr()?;

    thread::Builder::new()
        .name("keep-alive".to_string())
        .spawn(move || serve(listener))
        .context("failed to spawn keep-alive thread")?;

    info!("keep-alive listening on {}", local_addr);
    Ok(local_addr)
}

fn serve(listener: TcpListener) {
    for stream in listener.incoming() {
        match stream {
            Ok(stream) => {
                if let Err(err) = respond(stream) {
                    debug!("keep-alive connection error: {}", err);
                }
            }
            Err(err) => warn!("keep-alive accept failed: {}", err),
        }
    }
}

fn respond(mut stream: TcpStream) -> std::io::Result<()> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;

    // the request itself does not matter, drain what has arrived
    let mut buf = [0u8; 1024];
    let _ = stream.read(&mut buf)?;

    stream.write_all(RESPONSE)?;
    stream.flush()
}

#[cfg(test)]
mod test {
    use std::{
        io::{Read, Write},
        net::TcpStream,
    };

    use super::spawn;

    #[test]
    fn test_keep_alive_answers() {
        let addr = spawn("127.0.0.1:0".parse().unwrap()).unwrap();

        for _ in 0..2 {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream
                .write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .unwrap();

            let mut response = String::new();
            stream.read_to_string(&mut response).unwrap();
            assert!(response.starts_with("HTTP/1.1 200 OK"));
            assert!(response.ends_with("alive"));
        }
    }
}
