//! Protocol client: handshake and request/response correlation.
//!
//! A single task owns the connection, so responses and events are processed
//! in strict network-arrival order and no locking is needed. At most one
//! request is in flight at a time; events that arrive while a response is
//! awaited are queued for [`ProtocolClient::next_event`].

use std::collections::VecDeque;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::ObsConfig;
use crate::error::{Error, Result};

use super::messages::{
    self, opcode, Envelope, Event, EventEnvelope, Hello, Identified, OutputPath, RawStats,
    RecordStatus, RequestResponse, SceneList, StreamStatus, CLOSE_AUTH_FAILED,
};
use super::transport::{Frame, Transport};

/// An identified session with OBS.
pub struct ProtocolClient {
    transport: Transport,
    next_request_id: u64,
    event_queue: VecDeque<Event>,
    request_timeout: Duration,
    closed: bool,
}

enum Incoming {
    Event(Event),
    Response(RequestResponse),
}

impl ProtocolClient {
    /// Performs the Hello/Identify exchange on a fresh transport and returns
    /// an identified client. The whole exchange is bounded by the configured
    /// request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] when OBS requires a password we don't have or
    /// rejects the one we sent, [`Error::Protocol`] on any malformed or
    /// unexpected handshake frame, and [`Error::Timeout`] if OBS stalls.
    pub async fn identify(transport: Transport, config: &ObsConfig) -> Result<Self> {
        let deadline = Duration::from_millis(config.request_timeout_ms);
        match timeout(deadline, Self::identify_exchange(transport, config)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(config.request_timeout_ms)),
        }
    }

    async fn identify_exchange(mut transport: Transport, config: &ObsConfig) -> Result<Self> {
        let hello: Hello = match transport.recv().await? {
            Frame::Text(text) => {
                let env = parse_envelope(&text)?;
                if env.op != opcode::HELLO {
                    return Err(Error::Protocol(format!(
                        "expected Hello, got op {}",
                        env.op
                    )));
                }
                serde_json::from_value(env.d)
                    .map_err(|e| Error::Protocol(format!("malformed Hello: {e}")))?
            }
            Frame::Closed { code, reason } => {
                return Err(Error::Protocol(format!(
                    "connection closed during handshake{}",
                    close_detail(code, reason.as_deref())
                )));
            }
        };

        let authentication = match &hello.authentication {
            Some(challenge) => match config.password.as_deref() {
                Some(password) => Some(messages::auth_response(
                    password,
                    &challenge.salt,
                    &challenge.challenge,
                )),
                None => {
                    return Err(Error::Auth(
                        "OBS requires a password but none was configured".into(),
                    ));
                }
            },
            None => None,
        };

        transport
            .send(messages::identify_frame(authentication.as_deref()))
            .await?;

        match transport.recv().await? {
            Frame::Text(text) => {
                let env = parse_envelope(&text)?;
                if env.op != opcode::IDENTIFIED {
                    return Err(Error::Protocol(format!(
                        "expected Identified, got op {}",
                        env.op
                    )));
                }
                let identified: Identified = serde_json::from_value(env.d)
                    .map_err(|e| Error::Protocol(format!("malformed Identified: {e}")))?;
                debug!(
                    rpc_version = identified.negotiated_rpc_version,
                    "identified with OBS"
                );
            }
            Frame::Closed { code, reason } => {
                if code == Some(CLOSE_AUTH_FAILED) {
                    return Err(Error::Auth("OBS rejected the password".into()));
                }
                return Err(Error::Protocol(format!(
                    "connection closed during identify{}",
                    close_detail(code, reason.as_deref())
                )));
            }
        }

        Ok(Self {
            transport,
            next_request_id: 0,
            event_queue: VecDeque::new(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            closed: false,
        })
    }

    /// Sends one request and awaits its response, matched by correlation id.
    ///
    /// Events arriving before the response are queued, not dropped. Only one
    /// request is ever in flight, so a response bearing a different id can
    /// only belong to an earlier request that timed out; it is discarded and
    /// the wait continues.
    ///
    /// # Errors
    ///
    /// [`Error::NotConnected`] if the session is closed, [`Error::Timeout`]
    /// if no response arrives within the deadline, [`Error::Rejected`] if
    /// OBS refuses the request, or a transport/protocol error.
    pub async fn request(&mut self, request_type: &str, data: Option<Value>) -> Result<Option<Value>> {
        if self.closed {
            return Err(Error::NotConnected);
        }

        self.next_request_id += 1;
        let request_id = format!("{request_type}-{}", self.next_request_id);
        self.transport
            .send(messages::request_frame(&request_id, request_type, data))
            .await
            .inspect_err(|_| self.closed = true)?;

        let deadline = self.request_timeout;
        match timeout(deadline, self.wait_response(&request_id)).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(deadline.as_millis() as u64)),
        }
    }

    async fn wait_response(&mut self, request_id: &str) -> Result<Option<Value>> {
        loop {
            match self.recv_incoming().await? {
                Incoming::Event(event) => self.event_queue.push_back(event),
                Incoming::Response(response) => {
                    if response.request_id != request_id {
                        // A response that outlived its timed-out request.
                        warn!(
                            request_id = %response.request_id,
                            "discarding stale response"
                        );
                        continue;
                    }
                    if !response.request_status.result {
                        let code = response.request_status.code;
                        return Err(Error::Rejected {
                            request: response.request_type,
                            comment: response
                                .request_status
                                .comment
                                .unwrap_or_else(|| format!("code {code}")),
                        });
                    }
                    return Ok(response.response_data);
                }
            }
        }
    }

    /// Yields the next unsolicited event, in network-arrival order.
    ///
    /// # Errors
    ///
    /// Returns a transport error when the connection drops; the caller must
    /// treat that as a disconnect.
    pub async fn next_event(&mut self) -> Result<Event> {
        if let Some(event) = self.event_queue.pop_front() {
            return Ok(event);
        }
        if self.closed {
            return Err(Error::NotConnected);
        }
        loop {
            match self.recv_incoming().await? {
                Incoming::Event(event) => return Ok(event),
                Incoming::Response(response) => {
                    // No waiter exists outside request(); nothing to match.
                    warn!(
                        request_id = %response.request_id,
                        "dropping response with no pending request"
                    );
                }
            }
        }
    }

    async fn recv_incoming(&mut self) -> Result<Incoming> {
        loop {
            let frame = match self.transport.recv().await {
                Ok(frame) => frame,
                Err(e) => {
                    self.closed = true;
                    return Err(e);
                }
            };
            match frame {
                Frame::Text(text) => {
                    let env = parse_envelope(&text)?;
                    match env.op {
                        opcode::EVENT => {
                            let raw: EventEnvelope = serde_json::from_value(env.d)
                                .map_err(|e| Error::Protocol(format!("malformed event: {e}")))?;
                            return Ok(Incoming::Event(Event::parse(
                                &raw.event_type,
                                raw.event_data.as_ref(),
                            )));
                        }
                        opcode::REQUEST_RESPONSE => {
                            let response: RequestResponse = serde_json::from_value(env.d)
                                .map_err(|e| Error::Protocol(format!("malformed response: {e}")))?;
                            return Ok(Incoming::Response(response));
                        }
                        other => {
                            debug!(op = other, "ignoring frame");
                        }
                    }
                }
                Frame::Closed { code, reason } => {
                    self.closed = true;
                    return Err(Error::Transport(format!(
                        "connection closed{}",
                        close_detail(code, reason.as_deref())
                    )));
                }
            }
        }
    }

    /// Sends a close frame and ends the session.
    pub async fn close(&mut self) {
        self.closed = true;
        self.transport.close().await;
    }

    // ========================================================================
    // Typed requests
    // ========================================================================

    /// Gets the current recording status.
    pub async fn record_status(&mut self) -> Result<RecordStatus> {
        let data = self.request("GetRecordStatus", None).await?;
        response_data("GetRecordStatus", data)
    }

    /// Starts recording.
    pub async fn start_record(&mut self) -> Result<()> {
        self.request("StartRecord", None).await?;
        Ok(())
    }

    /// Stops recording and returns the output file path.
    pub async fn stop_record(&mut self) -> Result<String> {
        let data = self.request("StopRecord", None).await?;
        let path: OutputPath = response_data("StopRecord", data)?;
        Ok(path.output_path)
    }

    /// Pauses recording.
    pub async fn pause_record(&mut self) -> Result<()> {
        self.request("PauseRecord", None).await?;
        Ok(())
    }

    /// Resumes a paused recording.
    pub async fn resume_record(&mut self) -> Result<()> {
        self.request("ResumeRecord", None).await?;
        Ok(())
    }

    /// Gets the current streaming status.
    pub async fn stream_status(&mut self) -> Result<StreamStatus> {
        let data = self.request("GetStreamStatus", None).await?;
        response_data("GetStreamStatus", data)
    }

    /// Starts streaming.
    pub async fn start_stream(&mut self) -> Result<()> {
        self.request("StartStream", None).await?;
        Ok(())
    }

    /// Stops streaming.
    pub async fn stop_stream(&mut self) -> Result<()> {
        self.request("StopStream", None).await?;
        Ok(())
    }

    /// Gets the scene list together with the current program scene.
    pub async fn scene_list(&mut self) -> Result<SceneList> {
        let data = self.request("GetSceneList", None).await?;
        response_data("GetSceneList", data)
    }

    /// Sets the current program scene.
    pub async fn set_scene(&mut self, name: &str) -> Result<()> {
        self.request(
            "SetCurrentProgramScene",
            Some(serde_json::json!({ "sceneName": name })),
        )
        .await?;
        Ok(())
    }

    /// Gets performance statistics.
    pub async fn stats(&mut self) -> Result<RawStats> {
        let data = self.request("GetStats", None).await?;
        response_data("GetStats", data)
    }
}

fn parse_envelope(text: &str) -> Result<Envelope> {
    serde_json::from_str(text).map_err(|e| Error::Protocol(format!("malformed frame: {e}")))
}

fn response_data<T: DeserializeOwned>(request: &str, data: Option<Value>) -> Result<T> {
    let data =
        data.ok_or_else(|| Error::Protocol(format!("{request} response carried no data")))?;
    serde_json::from_value(data)
        .map_err(|e| Error::Protocol(format!("malformed {request} response: {e}")))
}

fn close_detail(code: Option<u16>, reason: Option<&str>) -> String {
    match (code, reason) {
        (Some(code), Some(reason)) if !reason.is_empty() => format!(" (code {code}: {reason})"),
        (Some(code), _) => format!(" (code {code})"),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use futures_util::{SinkExt, StreamExt};
    use serde_json::json;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_tungstenite::{accept_async, WebSocketStream};

    /// Minimal in-process OBS stand-in speaking just enough of the
    /// protocol for one scripted conversation.
    struct MockObs {
        listener: TcpListener,
        port: u16,
    }

    impl MockObs {
        async fn bind() -> Self {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let port = listener.local_addr().unwrap().port();
            Self { listener, port }
        }

        async fn accept(&self) -> WebSocketStream<TcpStream> {
            let (stream, _) = self.listener.accept().await.unwrap();
            accept_async(stream).await.unwrap()
        }

        /// Accepts a connection and runs the no-auth handshake, asserting
        /// the Identify frame is well formed.
        async fn accept_identified(&self) -> WebSocketStream<TcpStream> {
            let mut ws = self.accept().await;
            send_json(
                &mut ws,
                json!({
                    "op": opcode::HELLO,
                    "d": {"obsWebSocketVersion": "5.4.2", "rpcVersion": 1}
                }),
            )
            .await;

            let identify = recv_json(&mut ws).await;
            assert_eq!(identify["op"], u64::from(opcode::IDENTIFY));
            assert_eq!(identify["d"]["rpcVersion"], 1);

            send_json(
                &mut ws,
                json!({
                    "op": opcode::IDENTIFIED,
                    "d": {"negotiatedRpcVersion": 1}
                }),
            )
            .await;
            ws
        }
    }

    async fn send_json(ws: &mut WebSocketStream<TcpStream>, value: Value) {
        ws.send(Message::Text(value.to_string())).await.unwrap();
    }

    async fn recv_json(ws: &mut WebSocketStream<TcpStream>) -> Value {
        loop {
            match ws.next().await.expect("peer hung up").unwrap() {
                Message::Text(text) => return serde_json::from_str(&text).unwrap(),
                _ => continue,
            }
        }
    }

    fn response_frame(request_type: &str, request_id: &str, data: Option<Value>) -> Value {
        let mut d = json!({
            "requestType": request_type,
            "requestId": request_id,
            "requestStatus": {"result": true, "code": 100},
        });
        if let Some(data) = data {
            d["responseData"] = data;
        }
        json!({"op": opcode::REQUEST_RESPONSE, "d": d})
    }

    fn stats_payload() -> Value {
        json!({
            "cpuUsage": 2.5,
            "memoryUsage": 512.0,
            "activeFps": 60.0,
            "averageFrameRenderTime": 1.2,
            "renderSkippedFrames": 1,
            "renderTotalFrames": 1000,
            "outputSkippedFrames": 0,
            "outputTotalFrames": 500,
        })
    }

    fn test_config(port: u16, timeout_ms: u64) -> ObsConfig {
        ObsConfig {
            host: "127.0.0.1".into(),
            port,
            request_timeout_ms: timeout_ms,
            ..Default::default()
        }
    }

    async fn identify_against(mock: &MockObs, config: &ObsConfig) -> Result<ProtocolClient> {
        let transport = Transport::connect("127.0.0.1", mock.port).await?;
        ProtocolClient::identify(transport, config).await
    }

    #[tokio::test]
    async fn identify_without_auth_challenge() {
        let mock = MockObs::bind().await;
        let config = test_config(mock.port, 1000);

        let (ws, client) =
            tokio::join!(mock.accept_identified(), identify_against(&mock, &config));
        drop(ws);
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn identify_answers_auth_challenge() {
        let mock = MockObs::bind().await;
        let mut config = test_config(mock.port, 1000);
        config.password = Some("hunter2".into());

        let server = async {
            let mut ws = mock.accept().await;
            send_json(
                &mut ws,
                json!({
                    "op": opcode::HELLO,
                    "d": {
                        "obsWebSocketVersion": "5.4.2",
                        "rpcVersion": 1,
                        "authentication": {"challenge": "chal", "salt": "salt"}
                    }
                }),
            )
            .await;

            let identify = recv_json(&mut ws).await;
            assert_eq!(
                identify["d"]["authentication"],
                messages::auth_response("hunter2", "salt", "chal")
            );

            send_json(
                &mut ws,
                json!({"op": opcode::IDENTIFIED, "d": {"negotiatedRpcVersion": 1}}),
            )
            .await;
            ws
        };

        let (ws, client) = tokio::join!(server, identify_against(&mock, &config));
        drop(ws);
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn rejected_password_close_maps_to_auth_error() {
        let mock = MockObs::bind().await;
        let mut config = test_config(mock.port, 1000);
        config.password = Some("wrong".into());

        let server = async {
            let mut ws = mock.accept().await;
            send_json(
                &mut ws,
                json!({
                    "op": opcode::HELLO,
                    "d": {
                        "obsWebSocketVersion": "5.4.2",
                        "rpcVersion": 1,
                        "authentication": {"challenge": "chal", "salt": "salt"}
                    }
                }),
            )
            .await;
            let _identify = recv_json(&mut ws).await;
            ws.close(Some(CloseFrame {
                code: CloseCode::Library(CLOSE_AUTH_FAILED),
                reason: "authentication failed".into(),
            }))
            .await
            .unwrap();
        };

        let (_, result) = tokio::join!(server, identify_against(&mock, &config));
        assert!(matches!(result, Err(Error::Auth(_))));
    }

    #[tokio::test]
    async fn challenge_without_configured_password_is_auth_error() {
        let mock = MockObs::bind().await;
        let config = test_config(mock.port, 1000);

        let server = async {
            let mut ws = mock.accept().await;
            send_json(
                &mut ws,
                json!({
                    "op": opcode::HELLO,
                    "d": {
                        "obsWebSocketVersion": "5.4.2",
                        "rpcVersion": 1,
                        "authentication": {"challenge": "chal", "salt": "salt"}
                    }
                }),
            )
            .await;
            ws
        };

        let (ws, result) = tokio::join!(server, identify_against(&mock, &config));
        drop(ws);
        assert!(matches!(result, Err(Error::Auth(_))));
    }

    #[tokio::test]
    async fn identify_times_out_when_server_stays_silent() {
        let mock = MockObs::bind().await;
        let config = test_config(mock.port, 100);

        // Accept the socket but never send Hello.
        let (ws, result) = tokio::join!(mock.accept(), identify_against(&mock, &config));
        drop(ws);
        assert!(matches!(result, Err(Error::Timeout(100))));
    }

    #[tokio::test]
    async fn events_arriving_mid_request_are_queued_not_dropped() {
        let mock = MockObs::bind().await;
        let config = test_config(mock.port, 1000);

        let server = async {
            let mut ws = mock.accept_identified().await;

            let request = recv_json(&mut ws).await;
            assert_eq!(request["d"]["requestType"], "GetStats");
            let id = request["d"]["requestId"].as_str().unwrap().to_string();

            // An unsolicited event lands before the response.
            send_json(
                &mut ws,
                json!({
                    "op": opcode::EVENT,
                    "d": {
                        "eventType": "RecordStateChanged",
                        "eventIntent": 64,
                        "eventData": {
                            "outputActive": true,
                            "outputState": "OBS_WEBSOCKET_OUTPUT_STARTED"
                        }
                    }
                }),
            )
            .await;
            send_json(&mut ws, response_frame("GetStats", &id, Some(stats_payload()))).await;
            ws
        };

        let client_side = async {
            let mut client = identify_against(&mock, &config).await.unwrap();
            let stats = client.stats().await.unwrap();
            let event = client.next_event().await.unwrap();
            (stats, event)
        };

        let (ws, (stats, event)) = tokio::join!(server, client_side);
        drop(ws);

        assert_eq!(stats.render_total_frames, 1000);
        assert!(matches!(
            event,
            Event::RecordStateChanged {
                active: true,
                state: messages::OutputState::Started,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn stale_response_after_timeout_is_discarded() {
        let mock = MockObs::bind().await;
        let config = test_config(mock.port, 100);

        let server = async {
            let mut ws = mock.accept_identified().await;

            // Sit on the first request until the second arrives, then
            // answer them out of order: the stale one first.
            let first = recv_json(&mut ws).await;
            let first_id = first["d"]["requestId"].as_str().unwrap().to_string();
            let second = recv_json(&mut ws).await;
            let second_id = second["d"]["requestId"].as_str().unwrap().to_string();
            assert_ne!(first_id, second_id);

            send_json(&mut ws, response_frame("GetStats", &first_id, Some(stats_payload())))
                .await;
            send_json(&mut ws, response_frame("GetStats", &second_id, Some(stats_payload())))
                .await;
            ws
        };

        let client_side = async {
            let mut client = identify_against(&mock, &config).await.unwrap();
            let first = client.stats().await;
            let second = client.stats().await;
            (first, second)
        };

        let (ws, (first, second)) = tokio::join!(server, client_side);
        drop(ws);

        assert!(matches!(first, Err(Error::Timeout(100))));
        // The late answer to the first request must not poison the second.
        let stats = second.expect("second request should see its own response");
        assert_eq!(stats.render_total_frames, 1000);
    }

    #[tokio::test]
    async fn obs_refusal_maps_to_rejected() {
        let mock = MockObs::bind().await;
        let config = test_config(mock.port, 1000);

        let server = async {
            let mut ws = mock.accept_identified().await;
            let request = recv_json(&mut ws).await;
            let id = request["d"]["requestId"].as_str().unwrap().to_string();
            send_json(
                &mut ws,
                json!({
                    "op": opcode::REQUEST_RESPONSE,
                    "d": {
                        "requestType": "StartRecord",
                        "requestId": id,
                        "requestStatus": {
                            "result": false,
                            "code": 500,
                            "comment": "output already active"
                        }
                    }
                }),
            )
            .await;
            ws
        };

        let client_side = async {
            let mut client = identify_against(&mock, &config).await.unwrap();
            client.start_record().await
        };

        let (ws, result) = tokio::join!(server, client_side);
        drop(ws);

        match result {
            Err(Error::Rejected { request, comment }) => {
                assert_eq!(request, "StartRecord");
                assert_eq!(comment, "output already active");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dropped_connection_is_transport_error_then_not_connected() {
        let mock = MockObs::bind().await;
        let config = test_config(mock.port, 1000);

        let (ws, mut client) = tokio::join!(mock.accept_identified(), async {
            identify_against(&mock, &config).await.unwrap()
        });
        drop(ws);

        let err = client.next_event().await.unwrap_err();
        assert!(matches!(err, Error::Transport(_)));

        let err = client.stats().await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }
}
