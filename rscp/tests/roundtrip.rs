//! Upload then download against the same in-memory peer.

mod support;

use proptest::prelude::*;
use support::fake_scp::{FakeSession, Peer, Store};
use tokio::io::AsyncReadExt;

async fn roundtrip(name: &str, mode: u32, data: &[u8], settings: &rscp::Settings) {
    let store = Store::default();
    let session = FakeSession::new(Peer::Store(store.clone()));
    let journal = session.journal();
    let upload = rscp::File::new(name, data.len() as u64, mode, data);
    let warnings = rscp::write_file(&session, "/srv/box/", upload).await.unwrap();
    assert!(warnings.is_empty());
    let stored = store.get(&format!("/srv/box/{name}")).unwrap();
    assert_eq!(stored.mode, mode);
    let mut download = rscp::read_file(&session, &format!("/srv/box/{name}"), settings)
        .await
        .unwrap();
    assert_eq!(download.name(), name);
    assert_eq!(download.size(), data.len() as u64);
    assert_eq!(download.mode(), mode);
    let mut content = Vec::new();
    download.read_to_end(&mut content).await.unwrap();
    assert_eq!(content, data);
    download.into_content().finish().await.unwrap();
    assert_eq!(journal.closed(), 2);
}

#[tokio::test]
async fn test_roundtrip_text_file() {
    roundtrip(
        "notes.md",
        0o640,
        b"# notes\n\nsome text\n",
        &rscp::Settings::default(),
    )
    .await;
}

#[tokio::test]
async fn test_roundtrip_binary_file_across_many_chunks() {
    let data: Vec<u8> = (0..4096u32).flat_map(|i| i.to_le_bytes()).collect();
    roundtrip(
        "table.bin",
        0o600,
        &data,
        &rscp::Settings {
            chunk_size: 100,
            pipe_capacity: 3,
        },
    )
    .await;
}

#[tokio::test]
async fn test_roundtrip_missing_file_is_fatal_warning() {
    let session = FakeSession::new(Peer::Store(Store::default()));
    let error = rscp::read_file(&session, "/srv/box/nope", &rscp::Settings::default())
        .await
        .unwrap_err();
    assert!(matches!(error, rscp::Error::RemoteWarning(_)));
    assert_eq!(
        error.remote_message(),
        Some("scp: /srv/box/nope: No such file or directory")
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn test_roundtrip_preserves_everything(
        name in "[A-Za-z0-9_.-]{1,24}",
        mode in 0u32..=0o7777,
        data in proptest::collection::vec(any::<u8>(), 0..3000),
        chunk_size in 1usize..2048,
    ) {
        prop_assume!(name != "." && name != "..");
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let settings = rscp::Settings { chunk_size, pipe_capacity: 4 };
        runtime.block_on(roundtrip(&name, mode, &data, &settings));
    }
}
