//! Integration tests against a live Asterisk instance.
//!
//! These tests require Asterisk AMI on 127.0.0.1:5038 with a manager account
//! admin/s3cret. Run with: cargo test --test live_asterisk -- --ignored

use std::time::Duration;

use asterisk_ami_tokio::{AmiClient, AmiMessage};
use tokio::time::timeout;

const AMI_HOST: &str = "127.0.0.1";
const AMI_PORT: u16 = 5038;
const AMI_USERNAME: &str = "admin";
const AMI_SECRET: &str = "s3cret";

async fn connect_and_login() -> AmiClient {
    let client = AmiClient::connect(AMI_HOST, AMI_PORT)
        .await
        .expect("failed to connect to Asterisk");
    let ok = client
        .login(AMI_USERNAME, AMI_SECRET, true)
        .await
        .expect("login exchange failed");
    assert!(ok, "authentication rejected");
    client
}

#[tokio::test]
#[ignore]
async fn live_login_and_ping() {
    let client = connect_and_login().await;
    assert!(client.is_connected());

    let reply = client
        .send_action(AmiMessage::new("Ping"))
        .await
        .unwrap();
    assert_eq!(reply.response(), Some("Pong"));

    assert!(client.logoff().await.unwrap());
}

#[tokio::test]
#[ignore]
async fn live_core_status_reply() {
    let client = connect_and_login().await;

    let reply = client
        .send_action(AmiMessage::new("CoreStatus"))
        .await
        .unwrap();
    assert!(reply.is_success());
    assert!(reply.get("CoreStartupTime").is_some());

    client.disconnect().await;
}

#[tokio::test]
#[ignore]
async fn live_endpoint_list_follow_ups() {
    let client = connect_and_login().await;
    let mut events = client.subscribe();

    let action = AmiMessage::new("PJSIPShowEndpoints");
    let id = action.action_id().unwrap().to_string();
    let reply = client.send_action(action).await.unwrap();
    assert!(reply.is_success());

    loop {
        let event = timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("timed out waiting for endpoint list")
            .expect("event stream ended")
            .expect("event error");
        if event.action_id() != Some(id.as_str()) {
            continue;
        }
        if event.event() == Some("EndpointListComplete") {
            break;
        }
        assert_eq!(event.event(), Some("EndpointList"));
    }

    client.disconnect().await;
}
