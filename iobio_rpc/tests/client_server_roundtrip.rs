use std::time::Duration;

use bytes::Bytes;
use iobio_core::Value;
use iobio_rpc::{ALPN, Client, ClientError, DirEntry, EntryKind, FileKind, MemoryServer};
use iobio_sync::{MirrorHandle, Session, SessionEvent, SyncError};
use iroh::{Endpoint, protocol::Router};

const KEY: &str = "test-key";

fn server_and_client() -> (MemoryServer, Client) {
    let server = MemoryServer::new([KEY]);
    let client = server.local_client(KEY);
    (server, client)
}

/// Waits until `check` holds on the mirror, re-checking after every applied
/// delta.
async fn wait_until(session: &Session, check: impl Fn(&MirrorHandle) -> bool) {
    let mirror = session.mirror();
    let mut events = session.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        while !check(&mirror) {
            match events.recv().await {
                Ok(SessionEvent::Updated { .. }) => {}
                Ok(SessionEvent::Ended(end)) => panic!("session ended: {end:?}"),
                Err(err) => panic!("event stream failed: {err}"),
            }
        }
    })
    .await
    .expect("mirror reached the expected state");
}

fn strings(items: &[&str]) -> Value {
    Value::Array(items.iter().map(|item| Value::from(*item)).collect())
}

#[tokio::test]
async fn upload_and_download_multi_chunk_file() {
    let (_server, client) = server_and_client();

    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let payload = Bytes::from(payload);
    let meta = client
        .upload_bytes("data/blob.bin", payload.clone())
        .await
        .expect("upload succeeds");

    assert_eq!(meta.path, "data/blob.bin");
    assert_eq!(meta.kind, FileKind::File);
    assert_eq!(meta.size, payload.len() as u64);
    assert_eq!(meta.hash, *blake3::hash(&payload).as_bytes());

    let downloaded = client.download_file("/data/blob.bin").await.unwrap();
    assert_eq!(downloaded, payload);
}

#[tokio::test]
async fn upload_from_stream() {
    let (_server, client) = server_and_client();
    let chunks = futures::stream::iter(vec![
        Ok(Bytes::from_static(b"hello ")),
        Ok(Bytes::from_static(b"world")),
    ]);
    let meta = client.upload_file("greeting.txt", chunks).await.unwrap();
    assert_eq!(meta.size, 11);
    assert_eq!(
        client.download_file("greeting.txt").await.unwrap(),
        Bytes::from_static(b"hello world")
    );
}

#[tokio::test]
async fn failed_upload_stores_nothing() {
    let (server, client) = server_and_client();
    client.save_text_file("keep.txt", "kept").await.unwrap();
    let session = client.start_reinstate(10).await.unwrap();
    wait_until(&session, |mirror| mirror.get(&["keep.txt"]).is_some()).await;
    let before = server.tree_snapshot();

    let chunks = futures::stream::iter(vec![
        Ok(Bytes::from_static(b"hello ")),
        Err(std::io::Error::other("disk went away")),
    ]);
    assert!(matches!(
        client.upload_file("doc.txt", chunks).await,
        Err(ClientError::Channel(_))
    ));

    // Give the server task time to see the aborted stream.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(
        client.get_metadata("doc.txt").await,
        Err(ClientError::Remote(_))
    ));
    assert_eq!(server.file_count(), 1);
    assert_eq!(server.tree_snapshot(), before);

    // The next mutation is the first thing the mirror sees after the abort.
    client.save_text_file("next.txt", "n").await.unwrap();
    wait_until(&session, |mirror| mirror.get(&["next.txt"]).is_some()).await;
    assert!(session.mirror().get(&["doc.txt"]).is_none());
}

#[tokio::test]
async fn text_files_metadata_and_listing() {
    let (server, client) = server_and_client();

    let meta = client.save_text_file("notes/todo.md", "- ship it").await.unwrap();
    assert_eq!(meta.kind, FileKind::Text);
    assert_eq!(meta.size, 9);
    client.save_text_file("notes/deep/x.md", "x").await.unwrap();
    client.save_text_file("readme.md", "hi").await.unwrap();

    let fetched = client.get_metadata("notes/todo.md").await.unwrap();
    assert_eq!(fetched, meta);

    let root = client.list_directory("/").await.unwrap();
    assert_eq!(
        root,
        vec![
            DirEntry {
                name: "notes".to_owned(),
                kind: EntryKind::Directory
            },
            DirEntry {
                name: "readme.md".to_owned(),
                kind: EntryKind::File
            },
        ]
    );
    let notes = client.list_directory("notes").await.unwrap();
    assert_eq!(notes.len(), 2);

    assert!(matches!(
        client.list_directory("missing").await,
        Err(ClientError::Remote(_))
    ));
    // A file can not be used as a directory.
    assert!(matches!(
        client.save_text_file("readme.md/inner", "x").await,
        Err(ClientError::Remote(_))
    ));

    assert!(client.delete_file("notes/todo.md").await.unwrap());
    assert!(!client.delete_file("notes/todo.md").await.unwrap());
    assert!(matches!(
        client.get_metadata("notes/todo.md").await,
        Err(ClientError::Remote(_))
    ));
    assert_eq!(server.file_count(), 2);
}

#[tokio::test]
async fn tags_and_viewers_are_tracked() {
    let (_server, client) = server_and_client();
    client.save_text_file("shares/a.txt", "a").await.unwrap();

    client.add_tag("shares/a.txt", "draft").await.unwrap();
    client.add_tag("shares/a.txt", "draft").await.unwrap();
    client.add_viewer("shares/a.txt", "user7").await.unwrap();
    client.add_viewer("shares/a.txt", "user42").await.unwrap();
    client.remove_viewer("shares/a.txt", "user7").await.unwrap();

    let meta = client.get_metadata("shares/a.txt").await.unwrap();
    assert_eq!(meta.tags, vec!["draft".to_owned()]);
    assert_eq!(meta.viewers, vec!["user42".to_owned()]);

    client.remove_tag("shares/a.txt", "draft").await.unwrap();
    assert!(client.get_metadata("shares/a.txt").await.unwrap().tags.is_empty());
}

#[tokio::test]
async fn unknown_key_is_rejected() {
    let (_server, mut client) = server_and_client();
    client.set_auth_key("wrong");

    assert!(matches!(
        client.save_text_file("a.txt", "a").await,
        Err(ClientError::Remote(_))
    ));
    assert!(matches!(
        client.download_file("a.txt").await,
        Err(ClientError::Remote(_))
    ));
    assert!(matches!(
        client.start_reinstate(10).await,
        Err(ClientError::Sync(SyncError::Subscription))
    ));
}

#[tokio::test]
async fn reinstate_mirrors_existing_and_live_changes() {
    let (server, client) = server_and_client();
    client.save_text_file("docs/a.txt", "abc").await.unwrap();

    let session = client.start_reinstate(10).await.unwrap();
    wait_until(&session, |mirror| {
        mirror.get(&["docs", "a.txt", "size"]) == Some(Value::from(3))
    })
    .await;

    client.add_viewer("docs/a.txt", "user7").await.unwrap();
    client.add_viewer("docs/a.txt", "user42").await.unwrap();
    wait_until(&session, |mirror| {
        mirror.get(&["docs", "a.txt", "viewers"]) == Some(strings(&["user7", "user42"]))
    })
    .await;

    client.remove_viewer("docs/a.txt", "user7").await.unwrap();
    client.add_tag("docs/a.txt", "final").await.unwrap();
    wait_until(&session, |mirror| {
        mirror.get(&["docs", "a.txt", "viewers"]) == Some(strings(&["user42"]))
            && mirror.get(&["docs", "a.txt", "tags"]) == Some(strings(&["final"]))
    })
    .await;

    client.delete_file("docs/a.txt").await.unwrap();
    wait_until(&session, |mirror| mirror.get(&["docs"]).is_none()).await;

    assert_eq!(session.mirror().snapshot(), server.tree_snapshot());
}

#[tokio::test]
async fn small_window_still_delivers_everything() {
    let (server, client) = server_and_client();
    let session = client.start_reinstate(2).await.unwrap();

    for i in 0..20 {
        client
            .save_text_file(&format!("bulk/f{i}.txt"), "x")
            .await
            .unwrap();
    }
    wait_until(&session, |mirror| {
        mirror.get(&["bulk", "f19.txt", "kind"]) == Some(Value::from("text"))
    })
    .await;

    assert_eq!(session.mirror().snapshot(), server.tree_snapshot());
}

#[tokio::test]
async fn stopping_releases_the_server_subscription() {
    let (server, client) = server_and_client();
    let session = client.start_reinstate(10).await.unwrap();
    client.save_text_file("a.txt", "a").await.unwrap();
    wait_until(&session, |mirror| mirror.get(&["a.txt"]).is_some()).await;
    assert_eq!(server.subscriber_count(), 1);

    session.stop().await;
    let before = session.mirror().snapshot();

    tokio::time::timeout(Duration::from_secs(5), async {
        let mut i = 0;
        while server.subscriber_count() > 0 {
            i += 1;
            client
                .save_text_file(&format!("after/{i}.txt"), "x")
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscription released");

    assert_eq!(session.mirror().snapshot(), before);
}

/// Full round trip over iroh: a `MemoryServer` behind a router on one
/// endpoint, a `Client` on another.
#[tokio::test]
async fn roundtrip_over_iroh() {
    let server_endpoint = Endpoint::builder()
        .bind()
        .await
        .expect("bind server endpoint");
    let server = MemoryServer::new([KEY]);
    let _router = Router::builder(server_endpoint.clone())
        .accept(ALPN, server.clone())
        .spawn();

    let client_endpoint = Endpoint::builder()
        .bind()
        .await
        .expect("bind client endpoint");
    let client = Client::connect(client_endpoint, server_endpoint.addr(), KEY);

    let meta = client.save_text_file("hello.txt", "hello").await.unwrap();
    assert_eq!(meta.size, 5);
    assert_eq!(
        client.download_file("hello.txt").await.unwrap(),
        Bytes::from_static(b"hello")
    );

    let session = client.start_reinstate(10).await.unwrap();
    client.add_viewer("hello.txt", "user1").await.unwrap();
    wait_until(&session, |mirror| {
        mirror.get(&["hello.txt", "viewers"]) == Some(strings(&["user1"]))
    })
    .await;
}
