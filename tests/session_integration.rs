// Integration tests for the WebSocket-to-PTY session engine: drive a real
// axum server on an ephemeral port with a tokio-tungstenite client and a
// real PTY child (`cat`, `sh`).

#[cfg(test)]
mod session_integration_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    use wsty_lib::server::{self, AppState};
    use wsty_lib::ServerConfig;

    fn config(argv: Vec<&str>, credential: Option<&str>, once: bool, max_clients: u32) -> ServerConfig {
        ServerConfig {
            argv: argv.into_iter().map(String::from).collect(),
            credential: credential.map(String::from),
            readonly: false,
            check_origin: false,
            once,
            max_clients,
            sig_code: 1,
            sig_name: "SIGHUP".to_string(),
            reconnect: 10,
            prefs_json: "{}".to_string(),
            bind_addr: "127.0.0.1".to_string(),
            port: 0,
            kill_grace: Some(Duration::from_millis(500)),
        }
    }

    /// Bind an ephemeral listener, serve `state` on it, and return the
    /// address to connect to plus the state (for post-test assertions).
    async fn spawn_server(state: AppState) -> (std::net::SocketAddr, AppState) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let serve_state = state.clone();
        tokio::spawn(async move {
            let _ = server::serve(listener, serve_state).await;
        });
        // Give the listener a moment to start accepting.
        tokio::time::sleep(Duration::from_millis(20)).await;
        (addr, state)
    }

    async fn connect(addr: std::net::SocketAddr) -> tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    > {
        let url = format!("ws://{addr}/ws");
        let (ws, _) = tokio_tungstenite::connect_async(url).await.expect("connect");
        ws
    }

    fn input_frame(text: &str) -> WsMessage {
        let mut bytes = vec![b'0'];
        bytes.extend_from_slice(text.as_bytes());
        WsMessage::Binary(bytes)
    }

    fn json_data_frame(json: &str) -> WsMessage {
        WsMessage::Binary(json.as_bytes().to_vec())
    }

    fn resize_frame(columns: u16, rows: u16) -> WsMessage {
        let payload = format!(r#"{{"columns":{columns},"rows":{rows}}}"#);
        let mut bytes = vec![b'1'];
        bytes.extend_from_slice(payload.as_bytes());
        WsMessage::Binary(bytes)
    }

    async fn next_output(
        ws: &mut tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) -> Option<Vec<u8>> {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), ws.next())
                .await
                .expect("timed out waiting for a frame")?
            {
                Ok(WsMessage::Binary(data)) if data.first() == Some(&b'0') => {
                    return Some(data[1..].to_vec());
                }
                Ok(WsMessage::Binary(_)) => continue,
                Ok(WsMessage::Ping(_)) | Ok(WsMessage::Pong(_)) => continue,
                Ok(WsMessage::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
    }

    // S1: echo through a `cat` child.
    #[tokio::test]
    async fn echoes_input_back_as_output() {
        let state = AppState::new(Arc::new(config(vec!["cat"], None, false, 0)));
        let (addr, _state) = spawn_server(state).await;
        let mut ws = connect(addr).await;

        ws.send(json_data_frame("{}")).await.unwrap();
        ws.send(input_frame("hello\n")).await.unwrap();

        let mut seen = Vec::new();
        while seen.len() < 6 {
            let chunk = next_output(&mut ws).await.expect("session closed early");
            seen.extend_from_slice(&chunk);
        }
        assert!(String::from_utf8_lossy(&seen).contains("hello"));
    }

    // S2: resize propagates to the child's terminal size.
    #[tokio::test]
    async fn resize_changes_reported_terminal_size() {
        let state = AppState::new(Arc::new(config(vec!["sh"], None, false, 0)));
        let (addr, _state) = spawn_server(state).await;
        let mut ws = connect(addr).await;

        ws.send(json_data_frame("{}")).await.unwrap();
        ws.send(resize_frame(132, 40)).await.unwrap();
        ws.send(input_frame("stty size\n")).await.unwrap();

        let mut seen = String::new();
        for _ in 0..50 {
            let Some(chunk) = next_output(&mut ws).await else {
                break;
            };
            seen.push_str(&String::from_utf8_lossy(&chunk));
            if seen.contains("40 132") {
                break;
            }
        }
        assert!(seen.contains("40 132"), "got: {seen:?}");
    }

    // S3: a good auth token admits the session.
    #[tokio::test]
    async fn good_credential_authenticates_and_spawns() {
        let state = AppState::new(Arc::new(config(vec!["cat"], Some("s3cret"), false, 0)));
        let (addr, _state) = spawn_server(state).await;
        let mut ws = connect(addr).await;

        ws.send(json_data_frame(r#"{"AuthToken":"s3cret"}"#))
            .await
            .unwrap();
        ws.send(input_frame("ok\n")).await.unwrap();

        let mut seen = Vec::new();
        while seen.len() < 3 {
            let chunk = next_output(&mut ws).await.expect("session closed early");
            seen.extend_from_slice(&chunk);
        }
        assert!(String::from_utf8_lossy(&seen).contains("ok"));
    }

    // S4: a bad token is rejected with POLICY_VIOLATION and no child spawns.
    #[tokio::test]
    async fn bad_credential_is_rejected() {
        let state = AppState::new(Arc::new(config(vec!["cat"], Some("s3cret"), false, 0)));
        let (addr, state) = spawn_server(state).await;
        let mut ws = connect(addr).await;

        ws.send(json_data_frame(r#"{"AuthToken":"wrong"}"#))
            .await
            .unwrap();

        let close = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out")
            .expect("stream ended without a close frame");
        match close.unwrap() {
            WsMessage::Close(Some(frame)) => assert_eq!(frame.code, 1008u16.into()),
            other => panic!("expected a close frame, got {other:?}"),
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(state.registry.count().await, 0);
    }

    // S5: `once` mode serves exactly one session, rejects a concurrent
    // second, and shuts the process down once the first session closes.
    #[tokio::test]
    async fn once_mode_serves_one_session_then_shuts_down() {
        let state = AppState::new(Arc::new(config(vec!["cat"], None, true, 0)));
        let (addr, state) = spawn_server(state).await;

        let mut first = connect(addr).await;
        first.send(json_data_frame("{}")).await.unwrap();

        // A second concurrent connection must be rejected before upgrade.
        let second = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await;
        assert!(second.is_err(), "second connection should be refused");

        first.close(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(state.shutdown.is_shutdown_requested());
    }

    // S6: a slow consumer does not lose bytes; the capacity-1 channel just
    // makes the PTY reader block until the WebSocket sender drains.
    #[tokio::test]
    async fn slow_consumer_receives_every_byte_in_order() {
        let state = AppState::new(Arc::new(config(
            vec!["sh", "-c", "head -c 65536 /dev/zero | tr '\\0' 'a'"],
            None,
            false,
            0,
        )));
        let (addr, _state) = spawn_server(state).await;
        let mut ws = connect(addr).await;
        ws.send(json_data_frame("{}")).await.unwrap();

        let mut total = 0usize;
        loop {
            tokio::time::sleep(Duration::from_millis(5)).await;
            match next_output(&mut ws).await {
                Some(chunk) => {
                    assert!(chunk.iter().all(|&b| b == b'a'));
                    total += chunk.len();
                    if total >= 65536 {
                        break;
                    }
                }
                None => break,
            }
        }
        assert_eq!(total, 65536);
    }
}
