use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chpp_app::{
    AppBuilder, AppErrorCode, Message, Service, ServiceContext, ServiceDescriptor, Version,
};
use chpp_link::UnixDomainSocket;
use uuid::Uuid;

use crate::cmd::{ServeArgs, Session, Settings};
use crate::exit::{app_error, link_error, CliError, CliResult, INTERNAL, SUCCESS};

/// UUID of the demo echo service.
pub const ECHO_SERVICE_UUID: Uuid = Uuid::from_u128(0x6368_7070_6563_686f_0000_0000_0000_0001);

/// Echo the request body back. Any other command is rejected.
pub const ECHO_COMMAND: u16 = 0x0001;

const SESSION_POLL: Duration = Duration::from_millis(50);

/// Negotiated service that echoes [`ECHO_COMMAND`] requests.
pub struct EchoService {
    descriptor: ServiceDescriptor,
}

impl EchoService {
    pub fn new() -> chpp_app::Result<Self> {
        Ok(Self {
            descriptor: ServiceDescriptor::new(ECHO_SERVICE_UUID, "echo", Version::new(1, 0, 0))?,
        })
    }
}

impl Service for EchoService {
    fn descriptor(&self) -> &ServiceDescriptor {
        &self.descriptor
    }

    fn dispatch_request(
        &self,
        ctx: &ServiceContext,
        request: &Message,
    ) -> Result<(), AppErrorCode> {
        if request.header.command != ECHO_COMMAND {
            return Err(AppErrorCode::InvalidCommand);
        }
        tracing::debug!(len = request.body.len(), "echoing request");
        ctx.respond(request, &request.body)
            .map(|_| ())
            .map_err(|_| AppErrorCode::Busy)
    }
}

pub fn run(args: ServeArgs, settings: &Settings) -> CliResult<i32> {
    let socket =
        UnixDomainSocket::bind(&args.path).map_err(|err| link_error("bind failed", err))?;
    tracing::info!(path = %socket.path().display(), "serving");

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone(), args.path.clone())?;

    let mut served = 0usize;
    while running.load(Ordering::SeqCst) {
        if args.sessions.is_some_and(|limit| served >= limit) {
            break;
        }

        let link = socket
            .accept()
            .map_err(|err| link_error("accept failed", err))?;
        if !running.load(Ordering::SeqCst) {
            break;
        }

        let mut builder = AppBuilder::with_config(settings.app.clone());
        let echo = EchoService::new().map_err(|err| app_error("echo service", err))?;
        builder
            .register_service(Arc::new(echo))
            .map_err(|err| app_error("echo service", err))?;

        let session = Session::start(link, builder, settings)?;
        served += 1;
        tracing::info!(session = served, "peer connected");

        while running.load(Ordering::SeqCst) && !session.is_closed() {
            std::thread::sleep(SESSION_POLL);
        }
        session.shutdown();
        tracing::info!(session = served, "peer session ended");
    }

    Ok(SUCCESS)
}

/// Clear `running` on Ctrl-C and wake a blocked `accept` by connecting to ourselves.
fn install_ctrlc_handler(running: Arc<AtomicBool>, path: PathBuf) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
        let _ = UnixDomainSocket::connect(&path);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
