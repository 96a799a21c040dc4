#![allow(dead_code)]

use coap_ingest::forwarder::{Reading, ReadingSink, SinkError};
use coap_ingest::registry::{Device, DeviceCatalog, Profile, ResourceDescriptor, ValueType};
use parking_lot::Mutex;
use std::sync::Arc;

pub mod fixtures {
    use super::*;

    /// Devices used across the integration tests.
    ///
    /// `Temp-Sensor-1` has two profiles so lookups exercise the profile scan.
    pub fn catalog() -> DeviceCatalog {
        DeviceCatalog::from_devices([
            Device::new(
                "Temp-Sensor-1",
                vec![
                    Profile::new(
                        "temperature",
                        vec![
                            ResourceDescriptor::new("temperature", ValueType::Float64),
                            ResourceDescriptor::new("count", ValueType::Int32),
                        ],
                    ),
                    Profile::new(
                        "labels",
                        vec![
                            ResourceDescriptor::new("label", ValueType::String),
                            ResourceDescriptor::new("enabled", ValueType::Bool),
                        ],
                    ),
                ],
            ),
            Device::new("Empty-Device", vec![]),
        ])
    }
}

/// Sink that records every reading it receives.
#[derive(Default)]
pub struct RecordingSink {
    readings: Mutex<Vec<Reading>>,
    calls: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A sink that records and then reports failure.
    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Self::default()
        })
    }

    pub fn readings(&self) -> Vec<Reading> {
        self.readings.lock().clone()
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

impl ReadingSink for RecordingSink {
    fn post_readings(
        &self,
        device_name: &str,
        resource_name: &str,
        readings: &[Reading],
    ) -> Result<(), SinkError> {
        self.calls
            .lock()
            .push((device_name.to_owned(), resource_name.to_owned()));
        self.readings.lock().extend_from_slice(readings);
        if self.fail {
            Err(SinkError::Other("recording sink set to fail".into()))
        } else {
            Ok(())
        }
    }
}

pub mod coap_client {
    use coap_ingest::classifier::ResponseCode;
    use coap_ingest::server::dtls::{DTLS_MTU, PSK_CIPHERS};
    use coap_lite::{CoapOption, MessageClass, MessageType, Packet};
    use openssl::ssl::{Ssl, SslContext, SslMethod, SslOptions, SslStream, SslVerifyMode};
    use std::io::{self, Read, Write};
    use std::net::{SocketAddr, UdpSocket};
    use std::time::Duration;

    pub const GET: u8 = 0x01;
    pub const POST: u8 = 0x02;
    pub const PUT: u8 = 0x03;
    pub const DELETE: u8 = 0x04;

    pub const TEXT_PLAIN: u16 = 0;
    pub const APPLICATION_JSON: u16 = 50;

    #[derive(Debug)]
    pub struct Reply {
        pub code: ResponseCode,
        pub message_type: MessageType,
        pub message_id: u16,
        pub token: Vec<u8>,
        pub body: Vec<u8>,
    }

    impl Reply {
        pub fn body_text(&self) -> String {
            String::from_utf8_lossy(&self.body).into_owned()
        }
    }

    /// Connected UDP socket as a byte stream for OpenSSL.
    #[derive(Debug)]
    pub struct UdpStream(UdpSocket);

    impl Read for UdpStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.0.recv(buf)
        }
    }

    impl Write for UdpStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.send(buf)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    enum Transport {
        Plain(UdpSocket),
        Dtls(SslStream<UdpStream>),
    }

    /// Minimal CoAP client over UDP or DTLS-PSK.
    pub struct Client {
        transport: Transport,
        server: SocketAddr,
        next_id: u16,
    }

    fn client_socket() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket
            .set_read_timeout(Some(Duration::from_secs(3)))
            .unwrap();
        socket
    }

    fn encode_uint(v: u16) -> Vec<u8> {
        match v {
            0 => Vec::new(),
            1..=0xff => vec![v as u8],
            _ => v.to_be_bytes().to_vec(),
        }
    }

    impl Client {
        pub fn new(server: SocketAddr) -> Self {
            Self {
                transport: Transport::Plain(client_socket()),
                server,
                next_id: 0x4000,
            }
        }

        /// Complete a DTLS-PSK handshake with `server` using identity `test-client`.
        pub fn try_dtls(server: SocketAddr, key: &[u8]) -> Result<Self, String> {
            let socket = client_socket();
            socket.connect(server).map_err(|e| e.to_string())?;

            let mut builder = SslContext::builder(SslMethod::dtls()).map_err(|e| e.to_string())?;
            builder
                .set_cipher_list(PSK_CIPHERS)
                .map_err(|e| e.to_string())?;
            builder.set_verify(SslVerifyMode::NONE);
            builder.set_options(SslOptions::NO_QUERY_MTU);
            let key = key.to_vec();
            builder.set_psk_client_callback(move |_ssl, _hint, identity, psk| {
                let id = b"test-client\0";
                identity[..id.len()].copy_from_slice(id);
                psk[..key.len()].copy_from_slice(&key);
                Ok(key.len())
            });
            let context = builder.build();

            let mut ssl = Ssl::new(&context).map_err(|e| e.to_string())?;
            ssl.set_mtu(DTLS_MTU).map_err(|e| e.to_string())?;
            let stream = ssl
                .connect(UdpStream(socket))
                .map_err(|e| format!("DTLS handshake: {e}"))?;
            Ok(Self {
                transport: Transport::Dtls(stream),
                server,
                next_id: 0x4000,
            })
        }

        pub fn dtls(server: SocketAddr, key: &[u8]) -> Self {
            Self::try_dtls(server, key).unwrap()
        }

        /// Build a request with one Uri-Path option per `segments` entry (empty ones kept).
        pub fn build(
            &mut self,
            message_type: MessageType,
            code: u8,
            segments: &[&str],
            content_format: Option<u16>,
            payload: &[u8],
        ) -> Packet {
            self.next_id = self.next_id.wrapping_add(1);
            let mut p = Packet::new();
            p.header.set_type(message_type);
            p.header.code = MessageClass::from(code);
            p.header.message_id = self.next_id;
            p.set_token(vec![0xca, 0xfe, (self.next_id & 0xff) as u8]);
            for seg in segments {
                p.add_option(CoapOption::UriPath, seg.as_bytes().to_vec());
            }
            if let Some(cf) = content_format {
                p.add_option(CoapOption::ContentFormat, encode_uint(cf));
            }
            p.payload = payload.to_vec();
            p
        }

        pub fn send(&mut self, packet: &Packet) {
            self.send_raw(&packet.to_bytes_unlimited().unwrap());
        }

        /// Send bytes as one datagram (or one DTLS record).
        pub fn send_raw(&mut self, bytes: &[u8]) {
            match &mut self.transport {
                Transport::Plain(socket) => {
                    socket.send_to(bytes, self.server).unwrap();
                }
                Transport::Dtls(stream) => {
                    stream.ssl_write(bytes).unwrap();
                }
            }
        }

        pub fn receive(&mut self) -> Reply {
            let mut buf = [0u8; 2048];
            let n = match &mut self.transport {
                Transport::Plain(socket) => socket.recv_from(&mut buf).unwrap().0,
                Transport::Dtls(stream) => stream.ssl_read(&mut buf).unwrap(),
            };
            let p = Packet::from_bytes(&buf[..n]).unwrap();
            Reply {
                code: ResponseCode::from_raw(u8::from(p.header.code)),
                message_type: p.header.get_type(),
                message_id: p.header.message_id,
                token: p.get_token().to_vec(),
                body: p.payload.clone(),
            }
        }

        /// Send a confirmable request to a `/`-separated path and wait for the reply.
        pub fn request(
            &mut self,
            code: u8,
            path: &str,
            content_format: Option<u16>,
            payload: &[u8],
        ) -> Reply {
            let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
            let packet = self.build(
                MessageType::Confirmable,
                code,
                &segments,
                content_format,
                payload,
            );
            self.send(&packet);
            self.receive()
        }

        pub fn post_text(&mut self, path: &str, payload: &str) -> Reply {
            self.request(POST, path, Some(TEXT_PLAIN), payload.as_bytes())
        }
    }
}

pub mod test_server {
    use super::{fixtures, RecordingSink};
    use coap_ingest::forwarder::ReadingSink;
    use coap_ingest::metrics::GatewayMetrics;
    use coap_ingest::registry::DeviceRegistry;
    use coap_ingest::router::ResourceRouter;
    use coap_ingest::runtime_config::{DriverConfig, RuntimeConfig};
    use coap_ingest::server::{CoapServer, HandlerContext, ShutdownSignal, UdpEngine};
    use coap_ingest::GatewayResult;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::thread::JoinHandle;
    use std::time::Duration;

    pub fn loopback_driver() -> DriverConfig {
        DriverConfig {
            bind_addr: "127.0.0.1".into(),
            security_mode: "NoSec".into(),
            psk_key: String::new(),
            port: Some(0),
        }
    }

    /// Base64 of `secretPSK`.
    pub const PSK_KEY_B64: &str = "c2VjcmV0UFNL";
    pub const PSK_KEY: &[u8] = b"secretPSK";

    pub fn psk_driver() -> DriverConfig {
        DriverConfig {
            security_mode: "PSK".into(),
            psk_key: PSK_KEY_B64.into(),
            ..loopback_driver()
        }
    }

    pub fn fast_runtime() -> RuntimeConfig {
        RuntimeConfig {
            io_wait: Duration::from_millis(20),
            ..RuntimeConfig::default()
        }
    }

    pub fn context(sink: Arc<dyn ReadingSink>) -> HandlerContext {
        let registry: Arc<dyn DeviceRegistry> = Arc::new(fixtures::catalog());
        HandlerContext::new(
            ResourceRouter::new(registry),
            sink,
            Arc::new(GatewayMetrics::new()),
        )
    }

    /// A gateway serving on a loopback ephemeral port in a background thread.
    pub struct TestServer {
        pub addr: SocketAddr,
        pub shutdown: ShutdownSignal,
        pub context: HandlerContext,
        handle: Option<JoinHandle<(GatewayResult<()>, CoapServer<UdpEngine>)>>,
    }

    impl TestServer {
        pub fn start(sink: Arc<dyn ReadingSink>) -> Self {
            Self::start_with(loopback_driver(), sink)
        }

        pub fn start_with(driver: DriverConfig, sink: Arc<dyn ReadingSink>) -> Self {
            let context = context(sink);
            let shutdown = ShutdownSignal::new();
            let mut server: CoapServer<UdpEngine> = CoapServer::new(
                driver,
                fast_runtime(),
                context.clone(),
                shutdown.clone(),
            );
            server.configure().unwrap();
            let addr = server.bind().unwrap();
            server.listen().unwrap();
            let handle = std::thread::spawn(move || {
                let result = server.serve();
                (result, server)
            });
            Self {
                addr,
                shutdown,
                context,
                handle: Some(handle),
            }
        }

        pub fn start_recording() -> (Self, Arc<RecordingSink>) {
            let sink = RecordingSink::new();
            let server = Self::start(sink.clone());
            (server, sink)
        }

        /// Stop the loop and return the serve result with the stopped server.
        pub fn stop(mut self) -> (GatewayResult<()>, CoapServer<UdpEngine>) {
            self.shutdown.trigger();
            self.handle
                .take()
                .expect("server thread")
                .join()
                .expect("server thread panicked")
        }
    }

    impl Drop for TestServer {
        fn drop(&mut self) {
            self.shutdown.trigger();
            if let Some(handle) = self.handle.take() {
                let _ = handle.join();
            }
        }
    }
}
