//! Server lifecycle: resolve → secure → bind → register → loop → shutdown.
//!
//! ```text
//! Created ──configure──▶ Configured ──bind──▶ Bound ──listen──▶ Listening
//!                                                                  │ stop flag
//!                                              Stopped ◀─teardown─ Draining
//! ```
//!
//! Any failure before `Listening` runs the same teardown and leaves the server `Stopped`.

use super::engine::{CatchAllResource, Method, ProtocolEngine};
use super::handler::{data_handler, HandlerContext};
use super::resolve::resolve_address;
use super::shutdown::{ShutdownSignal, SignalRegistration};
use super::udp_engine::UdpEngine;
use crate::error::{GatewayError, GatewayResult};
use crate::runtime_config::{DriverConfig, RuntimeConfig};
use crate::security::{bootstrap, SecurityBootstrap};
use std::fmt;
use std::net::SocketAddr;
use tracing::{debug, error, info};

/// Lifecycle position of a [`CoapServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Created,
    Configured,
    Bound,
    Listening,
    Draining,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single-endpoint CoAP server driven by a [`ProtocolEngine`].
pub struct CoapServer<E: ProtocolEngine = UdpEngine> {
    state: LifecycleState,
    driver: DriverConfig,
    runtime: RuntimeConfig,
    context: HandlerContext,
    shutdown: ShutdownSignal,
    security: Option<SecurityBootstrap>,
    bind_addr: Option<SocketAddr>,
    local_addr: Option<SocketAddr>,
    engine: Option<E>,
    signals: Option<SignalRegistration>,
}

impl<E: ProtocolEngine> fmt::Debug for CoapServer<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoapServer")
            .field("state", &self.state)
            .field("driver", &self.driver)
            .field("bind_addr", &self.bind_addr)
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

impl<E: ProtocolEngine> CoapServer<E> {
    pub fn new(
        driver: DriverConfig,
        runtime: RuntimeConfig,
        context: HandlerContext,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            state: LifecycleState::Created,
            driver,
            runtime,
            context,
            shutdown,
            security: None,
            bind_addr: None,
            local_addr: None,
            engine: None,
            signals: None,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Address the endpoint is actually bound to (after [`bind`](Self::bind)).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    fn transition(&mut self, next: LifecycleState) {
        debug!(from = %self.state, to = %next, "Lifecycle transition");
        self.state = next;
    }

    fn expect_state(&self, expected: LifecycleState) -> GatewayResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(GatewayError::config(format!(
                "server is {}, expected {}",
                self.state, expected
            )))
        }
    }

    /// Run `step`, tearing the server down if it fails.
    fn guarded<T>(
        &mut self,
        step: impl FnOnce(&mut Self) -> GatewayResult<T>,
    ) -> GatewayResult<T> {
        match step(self) {
            Ok(v) => Ok(v),
            Err(e) => {
                error!(state = %self.state, error = %e, "Server startup failed");
                self.teardown();
                Err(e)
            }
        }
    }

    /// `Created → Configured`: security bootstrap and address resolution.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Config`] for a bad security setup, [`GatewayError::Resolution`] if
    /// the bind address does not resolve.
    pub fn configure(&mut self) -> GatewayResult<()> {
        self.guarded(|s| {
            s.expect_state(LifecycleState::Created)?;
            let security = bootstrap(&s.driver.security_mode, &s.driver.psk_key)?;
            let port = s
                .driver
                .port
                .unwrap_or_else(|| security.transport.default_port());
            let addr = resolve_address(&s.driver.bind_addr, &port.to_string())?;
            info!(
                address = %addr,
                transport = %security.transport,
                "Server configured"
            );
            s.security = Some(security);
            s.bind_addr = Some(addr);
            s.transition(LifecycleState::Configured);
            Ok(())
        })
    }

    /// `Configured → Bound`: engine context, transport security and listening endpoint.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Bind`] if any engine step fails.
    pub fn bind(&mut self) -> GatewayResult<SocketAddr> {
        self.guarded(|s| {
            s.expect_state(LifecycleState::Configured)?;
            let (security, addr) = match (&s.security, s.bind_addr) {
                (Some(sec), Some(addr)) => (sec.clone(), addr),
                _ => return Err(GatewayError::config("server is not configured")),
            };

            let mut engine = E::create(&s.runtime)?;
            if let Some(credentials) = security.psk() {
                engine.configure_psk(credentials)?;
            }
            let local = engine.open_endpoint(addr, security.transport)?;
            s.engine = Some(engine);
            s.local_addr = Some(local);
            info!("CoAP {} server started on {}", security.transport, local);
            s.transition(LifecycleState::Bound);
            Ok(local)
        })
    }

    /// `Bound → Listening`: register the catch-all resource and the signal handlers.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Io`] if the signal handlers cannot be installed.
    pub fn listen(&mut self) -> GatewayResult<()> {
        self.guarded(|s| {
            s.expect_state(LifecycleState::Bound)?;
            let resource = CatchAllResource::new(s.context.clone(), data_handler)
                .register(Method::Post, data_handler);
            match s.engine.as_mut() {
                Some(engine) => engine.add_resource(resource),
                None => return Err(GatewayError::config("server has no engine")),
            }
            s.signals = Some(s.shutdown.install_handlers().map_err(GatewayError::Io)?);
            s.transition(LifecycleState::Listening);
            Ok(())
        })
    }

    /// Dispatch until the stop flag is set, then tear down.
    ///
    /// The flag is checked once per wait/dispatch return, so shutdown latency is bounded by
    /// the configured I/O wait plus the request in flight.
    ///
    /// # Errors
    ///
    /// [`GatewayError::Io`] if the engine's wait/dispatch primitive fails.
    pub fn serve(&mut self) -> GatewayResult<()> {
        self.expect_state(LifecycleState::Listening)?;
        let wait = self.runtime.io_wait;
        let result = loop {
            if self.shutdown.is_set() {
                break Ok(());
            }
            let engine = match self.engine.as_mut() {
                Some(engine) => engine,
                None => break Err(GatewayError::config("server has no engine")),
            };
            if let Err(e) = engine.process(wait) {
                error!(error = %e, "Wait/dispatch failed");
                break Err(GatewayError::Io(e));
            }
        };
        if result.is_ok() {
            info!("Shutdown requested, draining");
            self.transition(LifecycleState::Draining);
        }
        self.teardown();
        result
    }

    /// Run the full lifecycle until shutdown.
    ///
    /// # Errors
    ///
    /// The first fatal error of any stage.
    pub fn run(&mut self) -> GatewayResult<()> {
        self.configure()?;
        self.bind()?;
        self.listen()?;
        self.serve()
    }

    /// Release the endpoint, engine and signal handlers. Idempotent.
    fn teardown(&mut self) {
        if self.state == LifecycleState::Stopped {
            return;
        }
        if let Some(mut engine) = self.engine.take() {
            engine.shutdown();
        }
        self.signals = None;
        self.security = None;
        self.context.metrics.log_summary();
        self.transition(LifecycleState::Stopped);
    }
}

impl<E: ProtocolEngine> Drop for CoapServer<E> {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Build a [`CoapServer`] on the bundled [`UdpEngine`] and run it to completion.
///
/// # Errors
///
/// Any fatal [`GatewayError`]; a requested shutdown is `Ok(())`.
pub fn run_server(
    driver: DriverConfig,
    runtime: RuntimeConfig,
    context: HandlerContext,
) -> GatewayResult<()> {
    let mut server: CoapServer<UdpEngine> =
        CoapServer::new(driver, runtime, context, ShutdownSignal::new());
    server.run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BindError;
    use crate::forwarder::LogSink;
    use crate::metrics::GatewayMetrics;
    use crate::registry::DeviceCatalog;
    use crate::router::ResourceRouter;
    use crate::security::{PskCredentials, TransportVariant};
    use std::io;
    use std::sync::Arc;
    use std::time::Duration;

    /// Engine that accepts everything and never sees traffic.
    struct IdleEngine {
        stop_after: Option<ShutdownSignal>,
    }

    impl ProtocolEngine for IdleEngine {
        fn create(_: &RuntimeConfig) -> Result<Self, BindError> {
            Ok(Self { stop_after: None })
        }
        fn configure_psk(&mut self, _: &PskCredentials) -> Result<(), BindError> {
            Ok(())
        }
        fn open_endpoint(
            &mut self,
            addr: SocketAddr,
            _: TransportVariant,
        ) -> Result<SocketAddr, BindError> {
            Ok(addr)
        }
        fn add_resource(&mut self, _: CatchAllResource) {}
        fn process(&mut self, _: Duration) -> io::Result<usize> {
            if let Some(s) = &self.stop_after {
                s.trigger();
            }
            Ok(0)
        }
        fn shutdown(&mut self) {}
    }

    /// Engine whose context creation always fails.
    struct BrokenEngine;

    impl ProtocolEngine for BrokenEngine {
        fn create(_: &RuntimeConfig) -> Result<Self, BindError> {
            Err(BindError::Context("no sockets".into()))
        }
        fn configure_psk(&mut self, _: &PskCredentials) -> Result<(), BindError> {
            Ok(())
        }
        fn open_endpoint(
            &mut self,
            addr: SocketAddr,
            _: TransportVariant,
        ) -> Result<SocketAddr, BindError> {
            Ok(addr)
        }
        fn add_resource(&mut self, _: CatchAllResource) {}
        fn process(&mut self, _: Duration) -> io::Result<usize> {
            Ok(0)
        }
        fn shutdown(&mut self) {}
    }

    fn driver(mode: &str, key: &str) -> DriverConfig {
        DriverConfig {
            bind_addr: "127.0.0.1".into(),
            security_mode: mode.into(),
            psk_key: key.into(),
            port: None,
        }
    }

    fn context() -> HandlerContext {
        HandlerContext::new(
            ResourceRouter::new(Arc::new(DeviceCatalog::new())),
            Arc::new(LogSink),
            Arc::new(GatewayMetrics::new()),
        )
    }

    #[test]
    fn configure_picks_default_ports() {
        let mut s: CoapServer<IdleEngine> = CoapServer::new(
            driver("NoSec", ""),
            RuntimeConfig::default(),
            context(),
            ShutdownSignal::new(),
        );
        s.configure().unwrap();
        assert_eq!(s.state(), LifecycleState::Configured);
        assert_eq!(s.bind().unwrap().port(), 5683);

        let mut s: CoapServer<IdleEngine> = CoapServer::new(
            driver("PSK", "a2V5"),
            RuntimeConfig::default(),
            context(),
            ShutdownSignal::new(),
        );
        s.configure().unwrap();
        assert_eq!(s.bind().unwrap().port(), 5684);
    }

    #[test]
    fn config_failure_stops_before_bind() {
        let mut s: CoapServer<IdleEngine> = CoapServer::new(
            driver("Bogus", ""),
            RuntimeConfig::default(),
            context(),
            ShutdownSignal::new(),
        );
        assert!(matches!(s.configure(), Err(GatewayError::Config(_))));
        assert_eq!(s.state(), LifecycleState::Stopped);
        assert!(s.local_addr().is_none());
    }

    #[test]
    fn engine_failure_is_bind_error() {
        let mut s: CoapServer<BrokenEngine> = CoapServer::new(
            driver("NoSec", ""),
            RuntimeConfig::default(),
            context(),
            ShutdownSignal::new(),
        );
        s.configure().unwrap();
        let err = s.bind().unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert_eq!(s.state(), LifecycleState::Stopped);
    }

    #[test]
    fn steps_out_of_order_are_rejected() {
        let mut s: CoapServer<IdleEngine> = CoapServer::new(
            driver("NoSec", ""),
            RuntimeConfig::default(),
            context(),
            ShutdownSignal::new(),
        );
        assert!(s.bind().is_err());
        assert_eq!(s.state(), LifecycleState::Stopped);
    }

    #[test]
    fn stop_flag_ends_the_loop() {
        let signal = ShutdownSignal::new();
        let mut s: CoapServer<IdleEngine> = CoapServer::new(
            driver("NoSec", ""),
            RuntimeConfig::default(),
            context(),
            signal.clone(),
        );
        s.configure().unwrap();
        s.bind().unwrap();
        s.listen().unwrap();
        if let Some(engine) = s.engine.as_mut() {
            engine.stop_after = Some(signal);
        }
        s.serve().unwrap();
        assert_eq!(s.state(), LifecycleState::Stopped);
    }
}
