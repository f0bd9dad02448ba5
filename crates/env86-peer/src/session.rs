use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::thread::JoinHandle;

use env86_transport::{Message, MessageSink, MessageSource};
use tracing::{debug, info, warn};

use crate::error::{PeerError, Result};
use crate::machine::{Machine, VmEvent};
use crate::surface::{ControlSurface, GuestConnector};

/// Events a session queue holds before senders block.
pub const EVENT_QUEUE_CAPACITY: usize = 4096;

/// Everything a session reacts to, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Vm(VmEvent),
    Control(Message),
    ControlClosed,
    Guest(Message),
    GuestClosed,
}

/// Which connection a pump reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Control,
    Guest,
}

impl Lane {
    fn message(self, message: Message) -> SessionEvent {
        match self {
            Lane::Control => SessionEvent::Control(message),
            Lane::Guest => SessionEvent::Guest(message),
        }
    }

    fn closed(self) -> SessionEvent {
        match self {
            Lane::Control => SessionEvent::ControlClosed,
            Lane::Guest => SessionEvent::GuestClosed,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Lane::Control => "env86-control",
            Lane::Guest => "env86-guest",
        }
    }
}

/// Posts events into a session's queue. Cheap to clone.
///
/// The queue is bounded: when the session falls behind, `send` blocks the
/// posting thread until there is room again.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: SyncSender<SessionEvent>,
}

impl EventSender {
    /// Queue an event, waiting while the queue is full. Fails once the
    /// session has finished.
    pub fn send(&self, event: SessionEvent) -> Result<()> {
        self.tx.send(event).map_err(|_| session_ended())
    }

    /// Queue an event without waiting. Returns `false` when the queue is full
    /// and the event was not queued.
    pub fn try_send(&self, event: SessionEvent) -> Result<bool> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => Ok(false),
            Err(TrySendError::Disconnected(_)) => Err(session_ended()),
        }
    }

    /// Queue a machine event.
    pub fn vm(&self, event: VmEvent) -> Result<()> {
        self.send(SessionEvent::Vm(event))
    }

    /// Queue every byte of `bytes` as serial output of `port`.
    pub fn serial_output(&self, port: u8, bytes: &[u8]) -> Result<()> {
        for &byte in bytes {
            self.vm(VmEvent::SerialByte { port, byte })?;
        }
        Ok(())
    }
}

fn session_ended() -> PeerError {
    PeerError::Disconnected("session has ended".to_string())
}

/// Move whole messages from `source` into the session queue until the
/// source ends, then post the lane's closed event.
pub fn spawn_pump<S>(mut source: S, events: EventSender, lane: Lane) -> Result<JoinHandle<()>>
where
    S: MessageSource + Send + 'static,
{
    let handle = std::thread::Builder::new()
        .name(lane.name().to_string())
        .spawn(move || {
            loop {
                match source.recv() {
                    Ok(Some(message)) => {
                        if events.send(lane.message(message)).is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        debug!(lane = lane.name(), "end of stream");
                        break;
                    }
                    Err(err) => {
                        warn!(lane = lane.name(), error = %err, "read failed");
                        break;
                    }
                }
            }
            let _ = events.send(lane.closed());
        })?;
    Ok(handle)
}

/// One VM session: a control surface driven by a single event queue.
///
/// Pumps and the emulator only post events; every state change happens on
/// the thread calling [`Session::run`], one event at a time.
pub struct Session<M, C, K> {
    surface: ControlSurface<M, C, K>,
    events: Receiver<SessionEvent>,
}

impl<M, C, K> Session<M, C, K>
where
    M: Machine,
    C: MessageSink,
    K: GuestConnector,
{
    /// Wrap `surface` and return the sender for its queue.
    pub fn new(surface: ControlSurface<M, C, K>) -> (Self, EventSender) {
        Self::with_capacity(surface, EVENT_QUEUE_CAPACITY)
    }

    /// Like [`Session::new`] with room for `capacity` queued events.
    pub fn with_capacity(
        surface: ControlSurface<M, C, K>,
        capacity: usize,
    ) -> (Self, EventSender) {
        let (tx, rx) = sync_channel(capacity.max(1));
        (
            Self {
                surface,
                events: rx,
            },
            EventSender { tx },
        )
    }

    /// Process events until the control connection closes or every sender
    /// is gone.
    pub fn run(&mut self) -> Result<()> {
        info!("session started");
        while let Ok(event) = self.events.recv() {
            match event {
                SessionEvent::Vm(event) => self.surface.on_vm_event(event)?,
                SessionEvent::Control(message) => self.surface.on_control_message(message)?,
                SessionEvent::ControlClosed => {
                    info!("control connection closed, ending session");
                    return Ok(());
                }
                SessionEvent::Guest(message) => self.surface.on_guest_message(&message.payload),
                SessionEvent::GuestClosed => self.surface.on_guest_closed(),
            }
        }
        info!("all event sources gone, ending session");
        Ok(())
    }

    pub fn surface(&self) -> &ControlSurface<M, C, K> {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut ControlSurface<M, C, K> {
        &mut self.surface
    }

    pub fn into_surface(self) -> ControlSurface<M, C, K> {
        self.surface
    }
}
