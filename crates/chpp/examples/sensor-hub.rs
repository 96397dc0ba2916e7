//! Two protocol stacks in one process: a "hub" serving a temperature
//! service and a "host" that discovers it and polls it.
//!
//! Run with:
//!   cargo run --example sensor-hub

use std::sync::Arc;
use std::time::Duration;

use chpp::app::{
    AppBuilder, AppErrorCode, Client, ClientDescriptor, Message, Service, ServiceContext,
    ServiceDescriptor, Version,
};
use chpp::link::LinkStream;
use chpp::transport::{Endpoint, EndpointConfig, SharedTransport, TransportConfig};
use uuid::Uuid;

const TEMPERATURE: Uuid = Uuid::from_u128(0x7465_6d70_0000_0000_0000_0000_0000_0001);
const READ_CELSIUS: u16 = 0x0001;

struct Thermometer {
    descriptor: ServiceDescriptor,
}

impl Service for Thermometer {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    fn dispatch_request(
        &self,
        ctx: &ServiceContext,
        request: &Message,
    ) -> Result<(), AppErrorCode> {
        match request.header.command {
            READ_CELSIUS => {
                let centi_celsius: i32 = 2_150;
                ctx.respond(request, &centi_celsius.to_le_bytes())
                    .map(|_| ())
                    .map_err(|_| AppErrorCode::Busy)
            }
            _ => Err(AppErrorCode::InvalidCommand),
        }
    }
}

struct ThermometerClient {
    descriptor: ClientDescriptor,
}

impl Client for ThermometerClient {
    fn descriptor(&self) -> &ClientDescriptor {
        &self.descriptor
    }

    fn on_bound(&self, handle: u8) {
        eprintln!("host: thermometer bound to handle {handle:#04x}");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (hub_link, host_link) = LinkStream::pair()?;
    let config = TransportConfig {
        mtu: 256,
        retransmit_timeout: Duration::from_millis(50),
        ..TransportConfig::default()
    };

    let mut hub = AppBuilder::new();
    hub.register_service(Arc::new(Thermometer {
        descriptor: ServiceDescriptor::new(TEMPERATURE, "thermometer", Version::new(1, 0, 0))?,
    }))?;
    let hub_transport = SharedTransport::new(config.clone())?;
    let hub_app = hub.build(hub_transport.clone());
    let hub_endpoint = Endpoint::start(
        hub_transport,
        hub_link,
        hub_app.clone(),
        EndpointConfig::default(),
    )?;

    let mut host = AppBuilder::new();
    let thermometer = host.register_client(Arc::new(ThermometerClient {
        descriptor: ClientDescriptor::new(TEMPERATURE, "thermometer", Version::new(1, 0, 0))
            .with_min_body(4),
    }))?;
    let host_transport = SharedTransport::new(config)?;
    let host_app = host.build(host_transport.clone());
    let host_endpoint = Endpoint::start(
        host_transport,
        host_link,
        host_app.clone(),
        EndpointConfig::default(),
    )?;

    let echoed = host_app.loopback(b"hello hub")?;
    eprintln!("host: loopback rtt {:?}", echoed.rtt);

    for service in host_app.discover()? {
        eprintln!(
            "host: found {} v{} at {:#04x}",
            service.descriptor.name, service.descriptor.version, service.handle
        );
    }

    let ctx = host_app
        .client(thermometer)
        .ok_or("thermometer client missing")?;
    for _ in 0..3 {
        let response = ctx.send_and_wait(READ_CELSIUS, &[])?;
        let raw: [u8; 4] = response.message.body.as_ref().try_into()?;
        eprintln!(
            "host: {:.2} C (rtt {:?})",
            f64::from(i32::from_le_bytes(raw)) / 100.0,
            response.rtt
        );
    }

    let sync = host_app.timesync()?;
    eprintln!("host: clock offset to hub {} ns", sync.offset_ns);

    host_endpoint.shutdown();
    hub_endpoint.shutdown();
    Ok(())
}
