//! The realtime connection capability and its webrtc-backed implementation.
//!
//! The session coordinator only talks to [`RealtimeConnection`]; everything
//! platform-specific (ICE, SDP, data channels, key exchange framing) lives
//! behind it. Callbacks from the platform are translated into typed events on
//! the session's queue, never into free-floating mutable state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::sdp_type::RTCSdpType;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::config::{add_ice_url_scheme, SessionConfig};
use crate::error::{ChannelError, NegotiationError};
use crate::logger::log;
use crate::peer::crypto::{CryptoCtx, KeyPair};
use crate::peer::events::{ConnState, EventSender, PeerEventKind};
use crate::peer::types::{Description, DescriptionKind};

/// Capability contract for the platform connection primitive.
///
/// All operations are asynchronous and may suspend for a platform-determined
/// duration; progress is reported through the event queue, never by polling.
#[async_trait]
pub trait RealtimeConnection: Send + Sync + Sized + 'static {
    /// Creates a fresh connection wired to the given event sender.
    async fn create(config: &SessionConfig, events: EventSender) -> Result<Self, NegotiationError>;

    /// Opens the duplex data channel. Initiator side only; the responder
    /// receives the channel through an event.
    async fn open_data_channel(&self, label: &str) -> Result<(), NegotiationError>;

    /// Begins local negotiation as the offering side. Eventually yields
    /// `LocalDescriptionReady` or `NegotiationFailed`.
    async fn create_local_offer(&self) -> Result<(), NegotiationError>;

    /// Begins local negotiation as the answering side.
    async fn create_local_answer(&self) -> Result<(), NegotiationError>;

    /// Applies the remote description. Out-of-order application fails with
    /// `UnexpectedRemoteDescription` and leaves the connection untouched.
    async fn set_remote_description(&self, desc: Description) -> Result<(), NegotiationError>;

    /// The current local description, if one exists and is offer/answer kind.
    async fn local_description(&self) -> Option<Description>;

    /// Sends one text message over the open channel.
    async fn send_text(&self, text: &str) -> Result<(), ChannelError>;

    /// Short authentication string once key exchange completed.
    fn fingerprint(&self) -> Option<String>;

    /// Releases all platform resources. Idempotent; closing an already
    /// closed connection is a no-op.
    async fn close(&self);
}

/// State shared with the data-channel callbacks.
struct ChannelShared {
    events: EventSender,
    dc: Mutex<Option<Arc<RTCDataChannel>>>,
    keys: Mutex<Option<KeyPair>>,
    crypto: Mutex<Option<CryptoCtx>>,
}

/// Production connection backed by the `webrtc` crate.
pub struct RtcConnection {
    pc: Arc<RTCPeerConnection>,
    shared: Arc<ChannelShared>,
    closed: AtomicBool,
}

#[async_trait]
impl RealtimeConnection for RtcConnection {
    async fn create(config: &SessionConfig, events: EventSender) -> Result<Self, NegotiationError> {
        let api = APIBuilder::new().build();
        let pc = Arc::new(
            api.new_peer_connection(rtc_config(config))
                .await
                .map_err(|e| NegotiationError::Platform(e.to_string()))?,
        );

        let shared = Arc::new(ChannelShared {
            events: events.clone(),
            dc: Mutex::new(None),
            keys: Mutex::new(None),
            crypto: Mutex::new(None),
        });

        {
            let events = events.clone();
            pc.on_ice_gathering_state_change(Box::new(move |state| {
                log(&format!("ICE gathering state changed to: {:?}", state));
                if state == RTCIceGathererState::Complete {
                    events.emit(PeerEventKind::IceGatheringComplete);
                }
                Box::pin(async {})
            }));
        }

        {
            let events = events.clone();
            pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
                log(&format!("peer connection state changed to: {:?}", st));
                if let Some(state) = map_conn_state(st) {
                    events.emit(PeerEventKind::StateChanged(state));
                }
                Box::pin(async {})
            }));
        }

        // Responder path: the initiator's channel arrives here
        {
            let shared = shared.clone();
            pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                log(&format!("inbound data channel: {}", dc.label()));
                attach_channel(&shared, &dc);
                Box::pin(async {})
            }));
        }

        Ok(Self {
            pc,
            shared,
            closed: AtomicBool::new(false),
        })
    }

    async fn open_data_channel(&self, label: &str) -> Result<(), NegotiationError> {
        let dc = self
            .pc
            .create_data_channel(label, Some(RTCDataChannelInit::default()))
            .await
            .map_err(|e| NegotiationError::Platform(e.to_string()))?;
        attach_channel(&self.shared, &dc);
        Ok(())
    }

    async fn create_local_offer(&self) -> Result<(), NegotiationError> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| NegotiationError::Platform(e.to_string()))?;
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| NegotiationError::Platform(e.to_string()))?;
        self.shared.events.emit(PeerEventKind::LocalDescriptionReady);
        Ok(())
    }

    async fn create_local_answer(&self) -> Result<(), NegotiationError> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| NegotiationError::Platform(e.to_string()))?;
        self.pc
            .set_local_description(answer)
            .await
            .map_err(|e| NegotiationError::Platform(e.to_string()))?;
        self.shared.events.emit(PeerEventKind::LocalDescriptionReady);
        Ok(())
    }

    async fn set_remote_description(&self, desc: Description) -> Result<(), NegotiationError> {
        // Ordering guards: one remote description per session, and an answer
        // only ever follows our own offer.
        if self.pc.remote_description().await.is_some() {
            return Err(NegotiationError::UnexpectedRemoteDescription);
        }
        if desc.kind == DescriptionKind::Answer && self.pc.local_description().await.is_none() {
            return Err(NegotiationError::UnexpectedRemoteDescription);
        }

        let sdp = match desc.kind {
            DescriptionKind::Offer => RTCSessionDescription::offer(desc.sdp),
            DescriptionKind::Answer => RTCSessionDescription::answer(desc.sdp),
        }
        .map_err(|e| NegotiationError::Platform(e.to_string()))?;

        self.pc
            .set_remote_description(sdp)
            .await
            .map_err(|e| NegotiationError::Platform(e.to_string()))
    }

    async fn local_description(&self) -> Option<Description> {
        let sdp = self.pc.local_description().await?;
        let kind = match sdp.sdp_type {
            RTCSdpType::Offer => DescriptionKind::Offer,
            RTCSdpType::Answer => DescriptionKind::Answer,
            _ => return None,
        };
        Some(Description { kind, sdp: sdp.sdp })
    }

    async fn send_text(&self, text: &str) -> Result<(), ChannelError> {
        let dc = { self.shared.dc.lock().unwrap().clone() };
        let Some(dc) = dc else {
            return Err(ChannelError::NotOpen);
        };

        // Seal under the lock, send outside of it
        let frame = {
            let mut guard = self.shared.crypto.lock().unwrap();
            match guard.as_mut() {
                Some(ctx) => ctx.seal(text.as_bytes())?,
                None => return Err(ChannelError::NotOpen),
            }
        };

        dc.send(&Bytes::from(frame))
            .await
            .map(|_| ())
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    fn fingerprint(&self) -> Option<String> {
        self.shared
            .crypto
            .lock()
            .unwrap()
            .as_ref()
            .map(|ctx| ctx.sas().to_string())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return; // already closed
        }
        let dc = { self.shared.dc.lock().unwrap().take() };
        if let Some(dc) = dc {
            let _ = dc.close().await;
        }
        let _ = self.pc.close().await;
        *self.shared.crypto.lock().unwrap() = None;
        *self.shared.keys.lock().unwrap() = None;
        log("connection closed, key material cleared");
    }
}

/// Shared data-channel wiring for both the opened (initiator) and received
/// (responder) channel. Generates the ephemeral key pair, sends the public
/// key on open, and runs the inbound frame handling.
fn attach_channel(shared: &Arc<ChannelShared>, dc: &Arc<RTCDataChannel>) {
    let keys = match KeyPair::generate() {
        Ok(keys) => keys,
        Err(e) => {
            shared
                .events
                .emit(PeerEventKind::NegotiationFailed(e.to_string()));
            return;
        }
    };
    let my_pub = keys.public();

    {
        *shared.dc.lock().unwrap() = Some(dc.clone());
        *shared.keys.lock().unwrap() = Some(keys);
        *shared.crypto.lock().unwrap() = None;
    }

    // First frame on open is our public key
    dc.on_open(Box::new({
        let dc = dc.clone();
        move || {
            log(&format!(
                "data channel open, sending public key {}",
                hex::encode(my_pub)
            ));
            let dc = dc.clone();
            Box::pin(async move {
                let _ = dc.send(&Bytes::copy_from_slice(&my_pub)).await;
            })
        }
    }));

    {
        let shared = shared.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            handle_frame(&shared, &msg.data);
            Box::pin(async {})
        }));
    }

    {
        let shared = shared.clone();
        dc.on_close(Box::new(move || {
            log("data channel closed");
            shared.events.emit(PeerEventKind::ChannelClosed);
            Box::pin(async {})
        }));
    }
}

fn handle_frame(shared: &ChannelShared, data: &[u8]) {
    // A 32-byte frame before key exchange is the peer's public key
    if data.len() == 32 && shared.crypto.lock().unwrap().is_none() {
        let Ok(peer_pub) = <[u8; 32]>::try_from(data) else {
            return;
        };
        log(&format!("received peer public key {}", hex::encode(peer_pub)));

        let keys = { shared.keys.lock().unwrap().take() };
        let Some(keys) = keys else {
            log("no local key pair for handshake, dropping frame");
            return;
        };

        match keys.into_ctx(&peer_pub) {
            Ok(ctx) => {
                log(&format!("key exchange complete, SAS: {}", ctx.sas()));
                *shared.crypto.lock().unwrap() = Some(ctx);
                shared.events.emit(PeerEventKind::ChannelOpen);
            }
            Err(e) => {
                shared
                    .events
                    .emit(PeerEventKind::NegotiationFailed(e.to_string()));
            }
        }
        return;
    }

    // Everything after the handshake is an encrypted frame
    let plaintext = {
        let mut guard = shared.crypto.lock().unwrap();
        match guard.as_mut() {
            Some(ctx) => ctx.open(data),
            None => {
                log("frame before key exchange, dropping");
                return;
            }
        }
    };

    if let Some(plaintext) = plaintext {
        match String::from_utf8(plaintext) {
            Ok(text) => shared.events.emit(PeerEventKind::ChannelMessage(text)),
            Err(_) => log("non-utf8 frame, dropping"),
        }
    }
}

fn map_conn_state(st: RTCPeerConnectionState) -> Option<ConnState> {
    match st {
        RTCPeerConnectionState::New => Some(ConnState::New),
        RTCPeerConnectionState::Connecting => Some(ConnState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnState::Closed),
        _ => None,
    }
}

fn rtc_config(config: &SessionConfig) -> RTCConfiguration {
    let ice_servers = config
        .ice_servers
        .iter()
        .map(|server| RTCIceServer {
            urls: vec![add_ice_url_scheme(server)],
            username: server.username.clone().unwrap_or_default(),
            credential: server.credential.clone().unwrap_or_default(),
        })
        .collect();

    RTCConfiguration {
        ice_servers,
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}
