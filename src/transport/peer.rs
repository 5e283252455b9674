use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use realtime_voice_utils::audio::{
    encode_mulaw, StreamResampler, FRAME_MS, PCMU_FRAME_SAMPLES, PCMU_SAMPLE_RATE,
};
use secrecy::SecretString;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_PCMU};
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState;
use webrtc::ice_transport::ice_gathering_state::RTCIceGatheringState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::media::{AudioConstraints, LocalMedia, MediaSource};
use crate::transport::{
    ConnectivityState, EventSink, Negotiator, SdpExchange, Transport, TransportEvent,
};

fn rtc(e: webrtc::Error) -> Error {
    Error::negotiation(e.to_string())
}

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectivityState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectivityState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectivityState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectivityState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectivityState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectivityState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectivityState::Closed),
        RTCPeerConnectionState::Unspecified => None,
    }
}

/// Waits until `is_done` holds, re-checking on every notification and every
/// `poll` tick. Change notifications may fire without the condition changing,
/// so they only trigger a re-check. Returns false when `ceiling` elapses first.
async fn wait_until<F>(is_done: F, notify: &Notify, poll: Duration, ceiling: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + ceiling;
    loop {
        if is_done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::select! {
            _ = notify.notified() => {}
            _ = tokio::time::sleep(poll) => {}
        }
    }
}

/// Opens WebRTC transports: microphone track out, JSON events over one data channel.
pub struct WebRtcNegotiator {
    media: Arc<dyn MediaSource>,
    constraints: AudioConstraints,
    exchange: SdpExchange,
    stun_urls: Vec<String>,
    channel_label: String,
    ice_poll_interval: Duration,
    ice_gathering_timeout: Duration,
}

impl WebRtcNegotiator {
    pub fn new(media: Arc<dyn MediaSource>, config: &Config) -> Self {
        Self {
            media,
            constraints: *config.constraints(),
            exchange: SdpExchange::new(config.realtime_url(), config.model()),
            stun_urls: config.stun_urls().to_vec(),
            channel_label: config.data_channel_label().to_string(),
            ice_poll_interval: config.ice_poll_interval(),
            ice_gathering_timeout: config.ice_gathering_timeout(),
        }
    }

    async fn new_peer_connection(&self) -> Result<Arc<RTCPeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().map_err(rtc)?;
        let registry =
            register_default_interceptors(Registry::new(), &mut media_engine).map_err(rtc)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        // Without STUN only host candidates are gathered.
        let ice_servers = if self.stun_urls.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.stun_urls.clone(),
                ..Default::default()
            }]
        };
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };
        Ok(Arc::new(api.new_peer_connection(config).await.map_err(rtc)?))
    }

    /// Everything after the peer connection exists. The caller closes `pc` on error.
    async fn negotiate(
        &self,
        pc: &Arc<RTCPeerConnection>,
        credential: &SecretString,
        sink: &EventSink,
        media: &mut dyn LocalMedia,
    ) -> Result<Wiring> {
        let state_sink = sink.clone();
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let sink = state_sink.clone();
            Box::pin(async move {
                tracing::info!("Peer connection state: {}", state);
                if let Some(state) = map_state(state) {
                    sink.emit(TransportEvent::Connectivity(state)).await;
                }
            })
        }));

        let gathering = Arc::new(Notify::new());
        let gathering_notify = gathering.clone();
        pc.on_ice_gathering_state_change(Box::new(move |state: RTCIceGathererState| {
            let notify = gathering_notify.clone();
            Box::pin(async move {
                tracing::debug!("ICE gatherer state: {}", state);
                notify.notify_waiters();
            })
        }));

        pc.on_track(Box::new(
            |track: Arc<TrackRemote>, _: Arc<RTCRtpReceiver>, _: Arc<RTCRtpTransceiver>| {
                Box::pin(async move {
                    tracing::debug!(kind = %track.kind(), "Remote track attached");
                })
            },
        ));

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_PCMU.to_owned(),
                clock_rate: PCMU_SAMPLE_RATE,
                channels: 1,
                ..Default::default()
            },
            "audio".to_owned(),
            "realtime-voice".to_owned(),
        ));
        let rtp_sender = pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(rtc)?;
        // RTCP has to be drained for the interceptors to run.
        let rtcp = tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtp_sender.read(&mut buf).await.is_ok() {}
        });

        let pump = match media.take_frames() {
            Some(frames) => match spawn_audio_pump(track, frames, media.sample_rate()) {
                Ok(pump) => Some(pump),
                Err(e) => {
                    rtcp.abort();
                    return Err(e);
                }
            },
            None => None,
        };
        let abort_tasks = || {
            rtcp.abort();
            if let Some(pump) = &pump {
                pump.abort();
            }
        };

        let channel = match pc.create_data_channel(&self.channel_label, None).await {
            Ok(channel) => channel,
            Err(e) => {
                abort_tasks();
                return Err(rtc(e));
            }
        };
        wire_channel(&channel, sink);

        if let Err(e) = self.offer_answer(pc, credential, &gathering).await {
            abort_tasks();
            if let Err(close_err) = channel.close().await {
                tracing::warn!("Failed to close control channel: {}", close_err);
            }
            return Err(e);
        }
        Ok(Wiring { channel, rtcp, pump })
    }

    async fn offer_answer(
        &self,
        pc: &Arc<RTCPeerConnection>,
        credential: &SecretString,
        gathering: &Notify,
    ) -> Result<()> {
        let offer = pc.create_offer(None).await.map_err(rtc)?;
        pc.set_local_description(offer).await.map_err(rtc)?;

        let complete = wait_until(
            || pc.ice_gathering_state() == RTCIceGatheringState::Complete,
            gathering,
            self.ice_poll_interval,
            self.ice_gathering_timeout,
        )
        .await;
        if !complete {
            tracing::warn!(
                "ICE gathering did not complete within {:?}, sending offer with candidates so far",
                self.ice_gathering_timeout
            );
        }

        let local = pc
            .local_description()
            .await
            .ok_or_else(|| Error::negotiation("no local description after gathering"))?;
        let answer_sdp = self.exchange.exchange(credential, &local.sdp).await?;
        let answer = RTCSessionDescription::answer(answer_sdp).map_err(rtc)?;
        pc.set_remote_description(answer).await.map_err(rtc)?;
        Ok(())
    }
}

#[async_trait]
impl Negotiator for WebRtcNegotiator {
    async fn open(&self, credential: SecretString, sink: EventSink) -> Result<Box<dyn Transport>> {
        let mut media = self.media.acquire(&self.constraints).await?;

        let pc = match self.new_peer_connection().await {
            Ok(pc) => pc,
            Err(e) => {
                media.stop();
                return Err(e);
            }
        };

        match self.negotiate(&pc, &credential, &sink, media.as_mut()).await {
            Ok(Wiring { channel, rtcp, pump }) => {
                tracing::info!("WebRTC transport negotiated");
                Ok(Box::new(WebRtcTransport {
                    pc,
                    channel,
                    media,
                    pump,
                    rtcp: Some(rtcp),
                    closed: false,
                }))
            }
            Err(e) => {
                tracing::error!("Negotiation failed: {}", e);
                media.stop();
                if let Err(close_err) = pc.close().await {
                    tracing::warn!("Failed to close peer connection: {}", close_err);
                }
                Err(e)
            }
        }
    }
}

struct Wiring {
    channel: Arc<RTCDataChannel>,
    rtcp: JoinHandle<()>,
    pump: Option<JoinHandle<()>>,
}

fn wire_channel(channel: &Arc<RTCDataChannel>, sink: &EventSink) {
    let open_sink = sink.clone();
    channel.on_open(Box::new(move || {
        Box::pin(async move {
            tracing::info!("Control channel open");
            open_sink.emit(TransportEvent::ChannelOpen).await;
        })
    }));

    let message_sink = sink.clone();
    channel.on_message(Box::new(move |msg: DataChannelMessage| {
        let sink = message_sink.clone();
        Box::pin(async move {
            match String::from_utf8(msg.data.to_vec()) {
                Ok(text) => {
                    sink.emit(TransportEvent::Message(text)).await;
                }
                Err(e) => tracing::warn!("Dropping non-UTF-8 control message: {}", e),
            }
        })
    }));

    let close_sink = sink.clone();
    channel.on_close(Box::new(move || {
        let sink = close_sink.clone();
        Box::pin(async move {
            tracing::info!("Control channel closed");
            sink.emit(TransportEvent::ChannelClosed).await;
        })
    }));
}

fn spawn_audio_pump(
    track: Arc<TrackLocalStaticSample>,
    mut frames: mpsc::Receiver<Vec<f32>>,
    sample_rate: u32,
) -> Result<JoinHandle<()>> {
    let chunk_size = (sample_rate as u64 * FRAME_MS / 1000) as usize;
    let mut resampler = StreamResampler::new(sample_rate, PCMU_SAMPLE_RATE, chunk_size)
        .map_err(|e| Error::Media(e.to_string()))?;

    Ok(tokio::spawn(async move {
        let mut pending: Vec<f32> = Vec::with_capacity(PCMU_FRAME_SAMPLES * 2);
        while let Some(frame) = frames.recv().await {
            pending.extend(resampler.push(&frame));
            while pending.len() >= PCMU_FRAME_SAMPLES {
                let chunk: Vec<f32> = pending.drain(..PCMU_FRAME_SAMPLES).collect();
                let sample = Sample {
                    data: Bytes::from(encode_mulaw(&chunk)),
                    duration: Duration::from_millis(FRAME_MS),
                    ..Default::default()
                };
                if let Err(e) = track.write_sample(&sample).await {
                    tracing::warn!("Failed to write audio sample: {}", e);
                }
            }
        }
        tracing::debug!("Audio pump finished");
    }))
}

struct WebRtcTransport {
    pc: Arc<RTCPeerConnection>,
    channel: Arc<RTCDataChannel>,
    media: Box<dyn LocalMedia>,
    pump: Option<JoinHandle<()>>,
    rtcp: Option<JoinHandle<()>>,
    closed: bool,
}

#[async_trait]
impl Transport for WebRtcTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        if self.closed {
            return Err(Error::TransportDisconnect("transport already closed".to_string()));
        }
        self.channel
            .send_text(text)
            .await
            .map_err(|e| Error::TransportDisconnect(e.to_string()))?;
        Ok(())
    }

    fn stop_capture(&mut self) {
        self.media.stop();
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
    }

    fn is_capturing(&self) -> bool {
        self.media.is_live()
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.stop_capture();
        if let Some(rtcp) = self.rtcp.take() {
            rtcp.abort();
        }
        if let Err(e) = self.channel.close().await {
            tracing::warn!("Failed to close control channel: {}", e);
        }
        if let Err(e) = self.pc.close().await {
            tracing::warn!("Failed to close peer connection: {}", e);
        }
        tracing::info!("WebRTC transport released");
    }
}

impl Drop for WebRtcTransport {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.stop_capture();
        if let Some(rtcp) = self.rtcp.take() {
            rtcp.abort();
        }
        let pc = self.pc.clone();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                let _ = pc.close().await;
            });
        }
    }
}
