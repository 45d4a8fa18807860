//! End-to-end exercise of the unit daemon over a real TCP socket: one
//! controller-side channel drives a full session from rejection before
//! Initialise through replay, standby and termination.

use std::time::Duration;

use tokio::net::TcpListener;

use evostim_protocol::{
    ChannelError, SegmentKind, SegmentSpec, StimulusModel, UnitChannel, UnitReply, UnitRequest,
};
use evostim_unit::device::SimCasu;
use evostim_unit::serve::serve;
use evostim_unit::session::Session;

const TIMEOUT: Duration = Duration::from_secs(5);

fn spec(duration: f64, kind: SegmentKind) -> SegmentSpec {
    SegmentSpec { duration, kind, unit_index: -1, description: None }
}

#[tokio::test]
async fn full_session_over_tcp() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server = tokio::spawn(async move {
        let mut session = Session::new(7, SimCasu::new(27.5), 28.0);
        serve(&listener, &mut session).await.unwrap();
    });

    let mut channel = UnitChannel::connect(7, &addr).await.unwrap();

    // Runs before Initialise must be refused without closing the channel.
    let reply = channel.request(&UnitRequest::RunPassive, TIMEOUT).await.unwrap();
    assert!(matches!(reply, UnitReply::Rejected { .. }));

    let initialise = UnitRequest::Initialise {
        frames_per_second: 4,
        segments: vec![
            spec(0.25, SegmentKind::NoStimuli),
            spec(0.25, SegmentKind::Vibration),
        ],
        has_blip: false,
        stimulus_model: StimulusModel::SinglePulseFrequencyPause,
    };
    let reply = channel.request(&initialise, TIMEOUT).await.unwrap();
    assert!(matches!(reply, UnitReply::Done));

    let reply = channel.request(&UnitRequest::ReadStatus, TIMEOUT).await.unwrap();
    match reply {
        UnitReply::Reading { temperature } => assert_eq!(temperature, 27.5),
        other => panic!("expected Reading, got {other:?}"),
    }

    let reply = channel.request(&UnitRequest::RunPassive, TIMEOUT).await.unwrap();
    assert!(matches!(reply, UnitReply::Done));

    let active = UnitRequest::RunActive { parameters: vec![440.0, 100.0] };
    let reply = channel.request(&active, TIMEOUT).await.unwrap();
    assert!(matches!(reply, UnitReply::Started { .. }));

    // Wrong parameter arity is refused and the session stays usable.
    let bad = UnitRequest::RunActive { parameters: vec![440.0] };
    let reply = channel.request(&bad, TIMEOUT).await.unwrap();
    assert!(matches!(reply, UnitReply::Rejected { .. }));

    let reply = channel.request(&UnitRequest::Standby, TIMEOUT).await.unwrap();
    assert!(matches!(reply, UnitReply::Done));

    let reply = channel.request(&UnitRequest::Terminate, TIMEOUT).await.unwrap();
    assert!(matches!(reply, UnitReply::Done));

    // The daemon exits after Terminate and the channel goes dead.
    server.await.unwrap();
    let err = channel.request(&UnitRequest::ReadStatus, TIMEOUT).await.unwrap_err();
    assert!(matches!(err, ChannelError::ConnectionClosed | ChannelError::Io(_)));
}

#[tokio::test]
async fn reconnecting_requires_fresh_initialise() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let mut session = Session::new(3, SimCasu::new(28.0), 28.0);
        let _ = serve(&listener, &mut session).await;
    });

    let initialise = UnitRequest::Initialise {
        frames_per_second: 4,
        segments: vec![spec(0.25, SegmentKind::NoStimuli)],
        has_blip: false,
        stimulus_model: StimulusModel::SinglePulseFrequencyPause,
    };

    let mut channel = UnitChannel::connect(3, &addr).await.unwrap();
    let reply = channel.request(&initialise, TIMEOUT).await.unwrap();
    assert!(matches!(reply, UnitReply::Done));
    drop(channel);

    // The session context is tied to the connection: after a reconnect
    // runs are refused until Initialise happens again.
    let mut channel = UnitChannel::connect(3, &addr).await.unwrap();
    let reply = channel.request(&UnitRequest::RunPassive, TIMEOUT).await.unwrap();
    assert!(matches!(reply, UnitReply::Rejected { .. }));
    let reply = channel.request(&initialise, TIMEOUT).await.unwrap();
    assert!(matches!(reply, UnitReply::Done));
    let reply = channel.request(&UnitRequest::RunPassive, TIMEOUT).await.unwrap();
    assert!(matches!(reply, UnitReply::Done));
}
