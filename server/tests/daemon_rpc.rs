//! End-to-end coverage of the daemon's request handling over a real Unix
//! socket: config, a cold download miss, an upload/commit round trip, the
//! resulting download hit, and a dismissed reservation.

use std::time::Duration;

use runcache_daemon::config::Config;
use runcache_daemon::daemon;
use runcache_proto::framing;
use runcache_proto::message::{AccessesWire, DepWire, DownloadReply, RpcReply, RpcReq};
use tokio::net::UnixStream;

async fn connect(socket_path: &std::path::Path) -> UnixStream {
    // `daemon::run` binds the socket asynchronously; give it a moment.
    for _ in 0..200 {
        if let Ok(stream) = UnixStream::connect(socket_path).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("daemon never came up at {}", socket_path.display());
}

async fn handshake(socket_path: &std::path::Path) -> UnixStream {
    let mut stream = connect(socket_path).await;
    framing::read_magic(&mut stream).await.unwrap();
    stream
}

async fn call(stream: &mut UnixStream, req: RpcReq) -> RpcReply {
    framing::write_frame(stream, &req).await.unwrap();
    framing::read_frame(stream).await.unwrap()
}

fn a_dep(name: &str, crc: u64) -> DepWire {
    DepWire {
        node: name.into(),
        is_static: false,
        accesses: AccessesWire { lnk: false, reg: true, stat: false },
        full: true,
        crc,
    }
}

#[tokio::test]
async fn config_download_upload_commit_download_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::resolve(dir.path().to_path_buf(), None, None, None, None).unwrap();
    let socket_path = config.socket_path.clone();
    let admin_dir = config.admin_dir.clone();
    let _daemon = tokio::spawn(daemon::run(config));

    let mut stream = handshake(&socket_path).await;

    let reply = call(&mut stream, RpcReq::Config { repo_key: "repo@rev1".into() }).await;
    let conn_id = match reply {
        RpcReply::Config { conn_id, .. } => conn_id,
        other => panic!("unexpected reply: {other:?}"),
    };

    let deps = vec![a_dep("src/main.rs", 42)];
    let reply = call(
        &mut stream,
        RpcReq::Download {
            conn_id,
            job: "build-foo".into(),
            deps: deps.clone(),
        },
    )
    .await;
    assert!(matches!(reply, RpcReply::Download(DownloadReply::Miss)));

    let reply = call(&mut stream, RpcReq::Upload { conn_id, reserved_sz: 64 }).await;
    let ticket = match reply {
        RpcReply::Upload { ticket, .. } => ticket,
        other => panic!("unexpected reply: {other:?}"),
    };

    std::fs::create_dir_all(admin_dir.join("reserved")).unwrap();
    std::fs::write(admin_dir.join("reserved").join(format!("{ticket}-data")), b"artifact bytes").unwrap();
    std::fs::write(admin_dir.join("reserved").join(format!("{ticket}-info")), b"{}").unwrap();

    let reply = call(
        &mut stream,
        RpcReq::Commit {
            conn_id,
            ticket,
            job: "build-foo".into(),
            deps: deps.clone(),
            last_access: 1,
            sz: 29,
            rate: 10,
            key_is_last: true,
        },
    )
    .await;
    assert!(matches!(reply, RpcReply::Commit));

    let reply = call(
        &mut stream,
        RpcReq::Download {
            conn_id,
            job: "build-foo".into(),
            deps,
        },
    )
    .await;
    match reply {
        RpcReply::Download(DownloadReply::Hit { key_is_last, .. }) => assert!(key_is_last),
        other => panic!("expected a hit after commit, got {other:?}"),
    }
}

#[tokio::test]
async fn dismiss_releases_an_unused_reservation() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config::resolve(dir.path().to_path_buf(), None, None, None, None).unwrap();
    let socket_path = config.socket_path.clone();
    let _daemon = tokio::spawn(daemon::run(config));

    let mut stream = handshake(&socket_path).await;
    let reply = call(&mut stream, RpcReq::Config { repo_key: "repo@rev1".into() }).await;
    let conn_id = match reply {
        RpcReply::Config { conn_id, .. } => conn_id,
        other => panic!("unexpected reply: {other:?}"),
    };

    let reply = call(&mut stream, RpcReq::Upload { conn_id, reserved_sz: 10 }).await;
    let ticket = match reply {
        RpcReply::Upload { ticket, .. } => ticket,
        other => panic!("unexpected reply: {other:?}"),
    };

    let reply = call(&mut stream, RpcReq::Dismiss { conn_id, ticket }).await;
    assert!(matches!(reply, RpcReply::Dismiss));

    // dismissing the same ticket twice is reported as an error reply, not
    // a connection drop.
    let reply = call(&mut stream, RpcReq::Dismiss { conn_id, ticket }).await;
    assert!(matches!(reply, RpcReply::Error { .. }));
}
