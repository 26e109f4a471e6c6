//! In-memory fake of the `RealtimeConnection` capability.
//!
//! Two fake endpoints find each other through an endpoint id embedded in the
//! fake SDP, the way real peers find each other through the candidates in a
//! real description. Gathering completes on a short timer so tests can also
//! exercise reset-before-gathering.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use pairlink::{
    ChannelError, ConnState, Description, DescriptionKind, EventSender, NegotiationError,
    PeerEventKind, RealtimeConnection, SessionConfig,
};

const GATHER_DELAY: Duration = Duration::from_millis(50);

fn registry() -> &'static Mutex<HashMap<String, Arc<FakeEndpoint>>> {
    static REGISTRY: OnceLock<Mutex<HashMap<String, Arc<FakeEndpoint>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

thread_local! {
    // Endpoints created on this test's thread, so a test can inspect the
    // handles its sessions own without reaching into the session.
    static CREATED: RefCell<Vec<Arc<FakeEndpoint>>> = const { RefCell::new(Vec::new()) };
}

/// Endpoints created by the current test, in creation order.
pub fn created_endpoints() -> Vec<Arc<FakeEndpoint>> {
    CREATED.with(|c| c.borrow().clone())
}

pub struct FakeEndpoint {
    id: String,
    events: EventSender,
    local: Mutex<Option<Description>>,
    remote: Mutex<Option<Description>>,
    peer_id: Mutex<Option<String>>,
    open: AtomicBool,
    closed: AtomicBool,
}

impl FakeEndpoint {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn fake_sdp(&self, kind: DescriptionKind) -> Description {
        Description {
            kind,
            sdp: format!("v=0 fake endpoint={}", self.id),
        }
    }

    fn announce_local(&self, kind: DescriptionKind) {
        *self.local.lock().unwrap() = Some(self.fake_sdp(kind));
        self.events.emit(PeerEventKind::LocalDescriptionReady);

        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(GATHER_DELAY).await;
            events.emit(PeerEventKind::IceGatheringComplete);
        });
    }

    fn mark_connected(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.events.emit(PeerEventKind::StateChanged(ConnState::Connected));
        self.events.emit(PeerEventKind::ChannelOpen);
    }
}

pub struct FakeConnection {
    ep: Arc<FakeEndpoint>,
}

fn endpoint_id_from_sdp(sdp: &str) -> Option<String> {
    sdp.split("endpoint=").nth(1).map(|s| s.trim().to_string())
}

#[async_trait]
impl RealtimeConnection for FakeConnection {
    async fn create(
        _config: &SessionConfig,
        events: EventSender,
    ) -> Result<Self, NegotiationError> {
        let id = hex::encode(rand::rng().random::<[u8; 8]>());
        let ep = Arc::new(FakeEndpoint {
            id: id.clone(),
            events,
            local: Mutex::new(None),
            remote: Mutex::new(None),
            peer_id: Mutex::new(None),
            open: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        });
        registry().lock().unwrap().insert(id, ep.clone());
        CREATED.with(|c| c.borrow_mut().push(ep.clone()));
        Ok(Self { ep })
    }

    async fn open_data_channel(&self, _label: &str) -> Result<(), NegotiationError> {
        Ok(())
    }

    async fn create_local_offer(&self) -> Result<(), NegotiationError> {
        self.ep.announce_local(DescriptionKind::Offer);
        Ok(())
    }

    async fn create_local_answer(&self) -> Result<(), NegotiationError> {
        if self.ep.remote.lock().unwrap().is_none() {
            return Err(NegotiationError::Platform(
                "answer requested before any offer was applied".into(),
            ));
        }
        self.ep.announce_local(DescriptionKind::Answer);
        Ok(())
    }

    async fn set_remote_description(&self, desc: Description) -> Result<(), NegotiationError> {
        if self.ep.remote.lock().unwrap().is_some() {
            return Err(NegotiationError::UnexpectedRemoteDescription);
        }
        if desc.kind == DescriptionKind::Answer && self.ep.local.lock().unwrap().is_none() {
            return Err(NegotiationError::UnexpectedRemoteDescription);
        }

        let peer_id = endpoint_id_from_sdp(&desc.sdp)
            .ok_or_else(|| NegotiationError::Platform("unparseable remote description".into()))?;
        let kind = desc.kind;
        *self.ep.remote.lock().unwrap() = Some(desc);
        *self.ep.peer_id.lock().unwrap() = Some(peer_id.clone());

        // Applying the answer completes negotiation on both sides
        if kind == DescriptionKind::Answer {
            let peer = registry()
                .lock()
                .unwrap()
                .get(&peer_id)
                .cloned()
                .ok_or_else(|| NegotiationError::Platform("peer endpoint gone".into()))?;
            *peer.peer_id.lock().unwrap() = Some(self.ep.id.clone());
            self.ep.mark_connected();
            peer.mark_connected();
        }
        Ok(())
    }

    async fn local_description(&self) -> Option<Description> {
        self.ep.local.lock().unwrap().clone()
    }

    async fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        if !self.ep.open.load(Ordering::SeqCst) || self.ep.is_closed() {
            return Err(ChannelError::NotOpen);
        }
        let peer_id = self
            .ep
            .peer_id
            .lock()
            .unwrap()
            .clone()
            .ok_or(ChannelError::NotOpen)?;
        let peer = registry()
            .lock()
            .unwrap()
            .get(&peer_id)
            .cloned()
            .ok_or_else(|| ChannelError::Send("peer endpoint gone".into()))?;
        if peer.is_closed() {
            return Err(ChannelError::Send("peer closed".into()));
        }
        peer.events.emit(PeerEventKind::ChannelMessage(text.to_string()));
        Ok(())
    }

    fn fingerprint(&self) -> Option<String> {
        None
    }

    async fn close(&self) {
        if self.ep.closed.swap(true, Ordering::SeqCst) {
            return; // second close is a no-op
        }
        self.ep.open.store(false, Ordering::SeqCst);

        // The peer eventually notices the other side going away
        let peer_id = self.ep.peer_id.lock().unwrap().clone();
        if let Some(peer_id) = peer_id {
            let peer = registry().lock().unwrap().get(&peer_id).cloned();
            if let Some(peer) = peer {
                peer.events
                    .emit(PeerEventKind::StateChanged(ConnState::Disconnected));
            }
        }
    }
}
