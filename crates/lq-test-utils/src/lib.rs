// lq-test-utils: Shared test utilities for the reactive query suite.
//
// Provides a mock WebSocket client for integration testing of the server
// service: typed frame send/receive with timeouts over tokio-tungstenite.

pub mod mock_ws_client;

pub use mock_ws_client::MockWsClient;
