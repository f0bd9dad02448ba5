//! Unix socket plumbing for both ends of a control connection.
//!
//! VM side: [`boot`] prepares the image, connects to the host's control
//! endpoint and asks it for `config`; [`ControlLink::into_session`] then
//! turns the connection into a running [`Session`]. Host side:
//! [`ControlListener`] binds the endpoint and yields a [`RemoteVm`] per
//! connecting VM.

use std::io::ErrorKind;
use std::path::Path;

use env86_frame::{EnvelopeConfig, EnvelopeReader, EnvelopeWriter, FrameError, RPC};
use env86_image::{prepare, BootConfig, BootOptions, Fetcher};
use env86_transport::{socket_path, IpcStream, SocketEndpoint};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{PeerError, Result};
use crate::machine::Machine;
use crate::remote::RemoteVm;
use crate::rpc::{reply_outcome, CallIds, RpcMessage, OP_CONFIG};
use crate::session::{spawn_pump, EventSender, Lane, Session};
use crate::surface::{ControlSurface, GuestConnector, GuestSink, SurfaceConfig};

/// Envelope writer over a socket stream.
pub type SocketSink = EnvelopeWriter<IpcStream>;

/// Envelope reader over a socket stream.
pub type SocketSource = EnvelopeReader<IpcStream>;

/// A VM session whose control and guest connections are Unix sockets.
pub type SocketSession<M> = Session<M, SocketSink, SocketGuestConnector>;

/// Connect to `endpoint` and split the stream into envelope halves.
pub fn connect_endpoint(
    endpoint: &str,
    config: &EnvelopeConfig,
) -> Result<(SocketSink, SocketSource)> {
    let path = socket_path(endpoint)?;
    let stream = SocketEndpoint::connect(&path)?;
    split(stream, config)
}

fn split(stream: IpcStream, config: &EnvelopeConfig) -> Result<(SocketSink, SocketSource)> {
    let reader_stream = stream.try_clone()?;
    let reader = EnvelopeReader::for_stream(reader_stream, config.clone())?;
    let writer = EnvelopeWriter::for_stream(stream, config.clone())?;
    Ok((writer, reader))
}

/// The VM's connection to its controller, before the session starts.
pub struct ControlLink {
    url: String,
    writer: SocketSink,
    reader: SocketSource,
    ids: CallIds,
    envelope: EnvelopeConfig,
}

impl ControlLink {
    /// Connect to the controller listening at `control_url`.
    pub fn connect(control_url: &str) -> Result<Self> {
        Self::connect_with_config(control_url, EnvelopeConfig::default())
    }

    /// Connect with explicit envelope limits and timeouts.
    pub fn connect_with_config(control_url: &str, envelope: EnvelopeConfig) -> Result<Self> {
        let (writer, reader) = connect_endpoint(control_url, &envelope)?;
        info!(url = control_url, "control connection established");
        Ok(Self {
            url: control_url.to_string(),
            writer,
            reader,
            ids: CallIds::default(),
            envelope,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Ask the controller for configuration overrides and wait for the answer.
    pub fn request_config(&mut self) -> Result<Value> {
        let id = self.ids.next_id();
        let call = RpcMessage::call(id, OP_CONFIG, Vec::new()).encode()?;
        self.writer
            .write_envelope(RPC, &call)
            .map_err(lost_controller)?;

        loop {
            let message = self.reader.read_envelope().map_err(lost_controller)?;
            if message.channel != RPC {
                debug!(channel = message.channel, "skipping non-rpc message before config reply");
                continue;
            }
            match RpcMessage::decode(&message.payload)? {
                RpcMessage::Reply { id: reply, result, error } if reply == id => {
                    return reply_outcome(result, error);
                }
                other => debug!(?other, "skipping message before config reply"),
            }
        }
    }

    /// Start a session for `machine` on this connection.
    ///
    /// The control reader moves to a pump thread; the guest service, if
    /// enabled, connects when the machine reports it has loaded.
    pub fn into_session<M: Machine>(
        self,
        machine: M,
        options: &BootOptions,
    ) -> Result<(SocketSession<M>, EventSender)> {
        let mut config = SurfaceConfig::from(options);
        config.control_url = Some(self.url.clone());

        let connector = SocketGuestConnector::new(self.envelope.clone());
        let surface = ControlSurface::new(machine, self.writer, connector, config)
            .with_call_ids(self.ids);
        let (mut session, events) = Session::new(surface);
        session
            .surface_mut()
            .connector_mut()
            .attach(events.clone());
        spawn_pump(self.reader, events.clone(), Lane::Control)?;
        Ok((session, events))
    }
}

fn lost_controller(err: FrameError) -> PeerError {
    match err {
        FrameError::ConnectionClosed => {
            PeerError::Disconnected("controller closed the connection".to_string())
        }
        FrameError::Io(io)
            if matches!(
                io.kind(),
                ErrorKind::BrokenPipe | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted
            ) =>
        {
            PeerError::Disconnected(io.to_string())
        }
        other => PeerError::Frame(other),
    }
}

/// Prepare `image_url` for booting and, when a control endpoint is
/// configured, fetch the controller's overrides.
///
/// The caller builds its machine from the returned configuration and then
/// starts the session with [`ControlLink::into_session`].
pub fn boot<F: Fetcher + ?Sized>(
    fetcher: &F,
    image_url: &str,
    options: BootOptions,
) -> Result<(BootConfig, Option<ControlLink>)> {
    let mut config = prepare(fetcher, image_url, options)?;
    let Some(url) = config.options.control_url.clone() else {
        return Ok((config, None));
    };

    let mut link = ControlLink::connect(&url)?;
    let overrides = link.request_config()?;
    config.merge_overrides(overrides)?;
    Ok((config, Some(link)))
}

/// Connects guest-service sockets and pumps them into a session.
pub struct SocketGuestConnector {
    events: Option<EventSender>,
    envelope: EnvelopeConfig,
}

impl SocketGuestConnector {
    pub fn new(envelope: EnvelopeConfig) -> Self {
        Self {
            events: None,
            envelope,
        }
    }

    /// Deliver guest traffic to this session queue.
    pub fn attach(&mut self, events: EventSender) {
        self.events = Some(events);
    }
}

impl GuestConnector for SocketGuestConnector {
    fn connect(&mut self, endpoint: &str) -> Result<GuestSink> {
        let events = self.events.clone().ok_or_else(|| {
            PeerError::Protocol("guest connector not attached to a session".to_string())
        })?;
        let (writer, reader) = connect_endpoint(endpoint, &self.envelope)?;
        spawn_pump(reader, events, Lane::Guest)?;
        info!(endpoint, "guest service connected");
        Ok(Box::new(writer))
    }

    fn max_payload(&self) -> usize {
        self.envelope.max_payload_size
    }
}

/// Host side: the control endpoint VMs connect to.
pub struct ControlListener {
    endpoint: SocketEndpoint,
    config: Value,
    envelope: EnvelopeConfig,
}

impl ControlListener {
    /// Bind the control endpoint at `control_url`.
    pub fn bind(control_url: &str) -> Result<Self> {
        let path = socket_path(control_url)?;
        Ok(Self {
            endpoint: SocketEndpoint::bind(path)?,
            config: Value::Object(Default::default()),
            envelope: EnvelopeConfig::default(),
        })
    }

    /// Overrides returned to VMs that call `config`.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    pub fn with_envelope_config(mut self, envelope: EnvelopeConfig) -> Self {
        self.envelope = envelope;
        self
    }

    /// Wait for the next VM.
    pub fn accept(&self) -> Result<RemoteVm<SocketSink, SocketSource>> {
        let stream = self.endpoint.accept()?;
        let (writer, reader) = split(stream, &self.envelope)?;
        Ok(RemoteVm::new(writer, reader).with_config(self.config.clone()))
    }

    pub fn path(&self) -> &Path {
        self.endpoint.path()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::path::PathBuf;
    use std::thread;

    use env86_frame::GUEST;
    use env86_transport::{MessageSink, MessageSource};
    use serde_json::json;

    use super::*;
    use crate::machine::VmEvent;
    use crate::testing::RecordingMachine;

    fn scratch(tag: &str) -> PathBuf {
        let dir = PathBuf::from(format!(
            "/tmp/env86-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    #[test]
    fn config_round_trip_over_a_socket() {
        let dir = scratch("cfg");
        let url = format!("unix://{}/ctl", dir.display());
        let listener = ControlListener::bind(&url)
            .expect("listener should bind")
            .with_config(json!({"EnableTTY": true}));

        let host = thread::spawn(move || {
            let mut vm = listener.accept().expect("listener should accept");
            vm.handle_next().expect("config call should be answered");
        });

        let mut link = ControlLink::connect(&url).expect("vm should connect");
        assert_eq!(link.request_config().unwrap(), json!({"EnableTTY": true}));
        host.join().expect("host thread should finish");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn config_without_a_controller_answer_is_a_disconnect() {
        let dir = scratch("nocfg");
        let url = format!("{}/ctl", dir.display());
        let listener = ControlListener::bind(&url).expect("listener should bind");

        let host = thread::spawn(move || {
            let vm = listener.accept().expect("listener should accept");
            drop(vm);
        });

        let mut link = ControlLink::connect(&url).expect("vm should connect");
        host.join().expect("host thread should finish");
        assert!(matches!(
            link.request_config(),
            Err(PeerError::Disconnected(_))
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn boot_merges_controller_overrides() {
        struct OneManifest;

        impl Fetcher for OneManifest {
            fn get(&self, url: &str) -> env86_image::Result<Option<Vec<u8>>> {
                Ok(url
                    .ends_with("/image.json")
                    .then(|| br#"{"memory_size": 1048576, "cmdline": "quiet"}"#.to_vec()))
            }
        }

        let dir = scratch("boot");
        let url = format!("unix://{}/ctl", dir.display());
        let listener = ControlListener::bind(&url)
            .expect("listener should bind")
            .with_config(json!({"EnableTTY": true, "cmdline": "console=ttyS0"}));
        let host = thread::spawn(move || {
            let mut vm = listener.accept().expect("listener should accept");
            vm.handle_next().expect("config call should be answered");
        });

        let options = BootOptions {
            control_url: Some(url.clone()),
            ..BootOptions::default()
        };
        let (config, link) = boot(&OneManifest, "http://images/base", options).unwrap();
        host.join().expect("host thread should finish");

        assert!(config.options.enable_tty);
        assert_eq!(config.options.control_url.as_deref(), Some(url.as_str()));
        assert_eq!(config.manifest.memory_size, Some(1 << 20));
        assert_eq!(config.manifest.extra["cmdline"], "console=ttyS0");
        assert_eq!(link.map(|l| l.url().to_string()), Some(url));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn boot_without_control_endpoint_stays_offline() {
        struct Bare;

        impl Fetcher for Bare {
            fn get(&self, _url: &str) -> env86_image::Result<Option<Vec<u8>>> {
                Ok(Some(b"{}".to_vec()))
            }
        }

        let (config, link) = boot(&Bare, "http://images/base", BootOptions::default()).unwrap();
        assert!(link.is_none());
        assert!(config.autostart);
    }

    #[test]
    fn full_session_with_guest_service() {
        let dir = scratch("e2e");
        let control_url = format!("unix://{}/ctl", dir.display());
        let guest_path = dir.join("guest");

        let listener = ControlListener::bind(&control_url).expect("control should bind");
        let guest_endpoint = SocketEndpoint::bind(&guest_path).expect("guest should bind");

        // Host: wait for the VM, then ask for its MAC.
        let host = thread::spawn(move || {
            let mut vm = listener.accept().expect("vm should connect");
            vm.wait_loaded().expect("vm should load");
            vm.mac().expect("mac should answer")
        });

        // Guest service: read one frame, answer with a close.
        let service = thread::spawn(move || {
            let stream = guest_endpoint.accept().expect("guest should connect");
            let (mut writer, mut reader) = split(stream, &EnvelopeConfig::default()).unwrap();
            let frame = reader.recv().unwrap().expect("one frame");
            writer.send(GUEST, &[106, 0, 0, 0, 5]).unwrap();
            frame
        });

        let options = BootOptions {
            guest_service: true,
            ..BootOptions::default()
        };
        let link = ControlLink::connect(&control_url).expect("vm should reach host");
        let (mut session, events) = link
            .into_session(RecordingMachine::default(), &options)
            .expect("session should start");

        events.vm(VmEvent::Loaded).unwrap();
        events.serial_output(1, &[105, 0, 0, 0, 5]).unwrap();
        drop(events);

        let vm_thread = thread::spawn(move || {
            session.run().expect("session should end cleanly");
            session.into_surface().into_machine()
        });

        assert_eq!(host.join().unwrap(), "52:54:00:12:34:0a");
        let frame = service.join().unwrap();
        assert_eq!(frame.channel, GUEST);
        assert_eq!(frame.payload.as_ref(), &[105, 0, 0, 0, 5]);

        // Host thread is done, so its connection is closed and the session ends.
        let machine = vm_thread.join().unwrap();
        assert!(machine.calls.is_empty());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
